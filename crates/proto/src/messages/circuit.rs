//! Transport-level messages: circuit bring-up, acknowledgments, pings.

use uuid::Uuid;

use crate::codec::{CodecError, Reader, Writer};

/// First packet on every new circuit; echoes the code handed out at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseCircuitCode {
    pub code: u32,
    pub session_id: Uuid,
    pub agent_id: Uuid,
}

impl UseCircuitCode {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            code: r.u32_le()?,
            session_id: r.uuid()?,
            agent_id: r.uuid()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u32_le(self.code);
        w.put_uuid(self.session_id);
        w.put_uuid(self.agent_id);
    }
}

/// Standalone acknowledgment batch. Ids here are little-endian, unlike the
/// big-endian appended-ACK trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketAck {
    pub ids: Vec<u32>,
}

impl PacketAck {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let count = r.block_count(4)?;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(r.u32_le()?);
        }
        Ok(Self { ids })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.ids.len() as u8);
        for id in &self.ids {
            w.put_u32_le(*id);
        }
    }
}

/// Recognized but unhandled; simulators address it to the viewer's
/// endpoint during handover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenCircuit {
    pub ip: u32,
    pub port: u16,
}

impl OpenCircuit {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            ip: r.u32_be()?,
            port: r.u16_be()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u32_be(self.ip);
        w.put_u16_be(self.port);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPingCheck {
    pub ping_id: u8,
    /// Oldest sequence id still awaiting acknowledgment, so the peer can
    /// drop stale resend state.
    pub oldest_unacked: u32,
}

impl StartPingCheck {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            ping_id: r.u8()?,
            oldest_unacked: r.u32_le()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.ping_id);
        w.put_u32_le(self.oldest_unacked);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletePingCheck {
    pub ping_id: u8,
}

impl CompletePingCheck {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self { ping_id: r.u8()? })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.ping_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_circuit_code_round_trip() {
        let msg = UseCircuitCode {
            code: 0x00C0FFEE,
            session_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
        };
        let mut w = Writer::new();
        msg.encode(&mut w);
        let buf = w.into_inner();
        assert_eq!(buf.len(), 36);
        assert_eq!(UseCircuitCode::decode(&mut Reader::new(&buf)).unwrap(), msg);
    }

    #[test]
    fn packet_ack_ids_are_little_endian() {
        let msg = PacketAck { ids: vec![7, 9] };
        let mut w = Writer::new();
        msg.encode(&mut w);
        assert_eq!(w.into_inner(), [2, 7, 0, 0, 0, 9, 0, 0, 0]);
    }
}
