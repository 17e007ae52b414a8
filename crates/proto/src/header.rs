use bitflags::bitflags;

use crate::codec::CodecError;

/// Flags byte, sequence id, and the rarely-used extra header block.
pub const MIN_HEADER_LEN: usize = 6;

/// Upper bound on ACK ids piggybacked onto one datagram; the count must
/// also fit the trailing count byte.
pub const MAX_APPENDED_ACKS: usize = 250;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        const APPENDED_ACKS = 0x10;
        const RESENT        = 0x20;
        const RELIABLE      = 0x40;
        const ZEROCODED     = 0x80;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub sequence: u32,
    pub extra: Vec<u8>,
}

impl PacketHeader {
    pub fn new(flags: PacketFlags, sequence: u32) -> Self {
        Self {
            flags,
            sequence,
            extra: Vec::new(),
        }
    }

    /// Parse the header off the front of a datagram. Returns the header and
    /// the offset at which the body (message id) starts.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), CodecError> {
        if data.len() < MIN_HEADER_LEN {
            return Err(CodecError::MalformedHeader);
        }
        let flags = PacketFlags::from_bits_truncate(data[0]);
        let sequence = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let extra_len = data[5] as usize;
        if data.len() < MIN_HEADER_LEN + extra_len {
            return Err(CodecError::MalformedHeader);
        }
        let extra = data[MIN_HEADER_LEN..MIN_HEADER_LEN + extra_len].to_vec();
        Ok((
            Self {
                flags,
                sequence,
                extra,
            },
            MIN_HEADER_LEN + extra_len,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.flags.bits());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.push(self.extra.len() as u8);
        out.extend_from_slice(&self.extra);
    }
}

/// Strip the appended-ACK trailer from a body slice. The trailer is a count
/// byte at the very end, preceded by that many big-endian sequence ids.
/// Returns the remaining body and the ids in wire order.
pub fn split_appended_acks(
    flags: PacketFlags,
    body: &[u8],
) -> Result<(&[u8], Vec<u32>), CodecError> {
    if !flags.contains(PacketFlags::APPENDED_ACKS) {
        return Ok((body, Vec::new()));
    }
    let Some(&count) = body.last() else {
        return Err(CodecError::MalformedHeader);
    };
    let trailer = 1 + count as usize * 4;
    if body.len() < trailer {
        return Err(CodecError::MalformedHeader);
    }
    let (rest, tail) = body.split_at(body.len() - trailer);
    let mut acks = Vec::with_capacity(count as usize);
    for chunk in tail[..count as usize * 4].chunks_exact(4) {
        acks.push(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok((rest, acks))
}

/// Append an ACK trailer to an outgoing datagram. The caller is responsible
/// for setting [`PacketFlags::APPENDED_ACKS`] and for capping the id count
/// at [`MAX_APPENDED_ACKS`].
pub fn append_acks(out: &mut Vec<u8>, acks: &[u32]) {
    debug_assert!(acks.len() <= MAX_APPENDED_ACKS);
    for id in acks {
        out.extend_from_slice(&id.to_be_bytes());
    }
    out.push(acks.len() as u8);
}
