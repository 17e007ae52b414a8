use glam::{Quat, Vec3, Vec4};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed packet header")]
    MalformedHeader,
    #[error("message id bytes are invalid or truncated")]
    UnknownMessageId,
    #[error("block count {count} does not fit in the remaining {remaining} bytes")]
    BlockCountOverflow { count: usize, remaining: usize },
    #[error("payload truncated: needed {needed} more bytes, {remaining} left")]
    PayloadTruncated { needed: usize, remaining: usize },
    #[error("zerocoded run extends past the end of the buffer")]
    BadZeroRun,
}

/// Cursor over a received payload. All numeric reads are little-endian
/// unless the method name says otherwise; the protocol is little-endian
/// everywhere except sequence ids and appended-ACK ids.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::PayloadTruncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.u8()? as i8)
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16_le(&mut self) -> Result<u16, CodecError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u16_be(&mut self) -> Result<u16, CodecError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i16_le(&mut self) -> Result<i16, CodecError> {
        Ok(self.u16_le()? as i16)
    }

    pub fn u32_le(&mut self) -> Result<u32, CodecError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32_be(&mut self) -> Result<u32, CodecError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32_le(&mut self) -> Result<i32, CodecError> {
        Ok(self.u32_le()? as i32)
    }

    pub fn u64_le(&mut self) -> Result<u64, CodecError> {
        let b = self.bytes(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    pub fn f32_le(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.u32_le()?))
    }

    pub fn uuid(&mut self) -> Result<Uuid, CodecError> {
        let b = self.bytes(16)?;
        let mut a = [0u8; 16];
        a.copy_from_slice(b);
        Ok(Uuid::from_bytes(a))
    }

    pub fn vec3(&mut self) -> Result<Vec3, CodecError> {
        Ok(Vec3::new(self.f32_le()?, self.f32_le()?, self.f32_le()?))
    }

    pub fn vec4(&mut self) -> Result<Vec4, CodecError> {
        Ok(Vec4::new(
            self.f32_le()?,
            self.f32_le()?,
            self.f32_le()?,
            self.f32_le()?,
        ))
    }

    /// 12-byte normalized quaternion: x, y, z on the wire, w recomputed.
    pub fn quat_norm3(&mut self) -> Result<Quat, CodecError> {
        let x = self.f32_le()?;
        let y = self.f32_le()?;
        let z = self.f32_le()?;
        let w_sq = 1.0 - (x * x + y * y + z * z);
        let w = if w_sq > 0.0 { w_sq.sqrt() } else { 0.0 };
        Ok(Quat::from_xyzw(x, y, z, w))
    }

    /// Variable field with a 1-byte length prefix.
    pub fn var1(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u8()? as usize;
        self.bytes(len)
    }

    /// Variable field with a 2-byte little-endian length prefix.
    pub fn var2(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u16_le()? as usize;
        self.bytes(len)
    }

    /// Null-terminated byte string; consumes the terminator.
    pub fn cstr(&mut self) -> Result<&'a [u8], CodecError> {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                let out = &rest[..end];
                self.pos += end + 1;
                Ok(out)
            }
            None => Err(CodecError::PayloadTruncated {
                needed: 1,
                remaining: 0,
            }),
        }
    }

    /// Variable-block count byte, sanity-checked against the bytes left.
    pub fn block_count(&mut self, min_block_len: usize) -> Result<usize, CodecError> {
        let count = self.u8()? as usize;
        if count * min_block_len > self.remaining() {
            return Err(CodecError::BlockCountOverflow {
                count,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }
}

/// Lossy text from a wire field, with trailing NULs dropped.
pub fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

/// Growable output buffer mirroring [`Reader`].
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u16_be(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i16_le(&mut self, v: i16) {
        self.put_u16_le(v as u16);
    }

    pub fn put_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32_be(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i32_le(&mut self, v: i32) {
        self.put_u32_le(v as u32);
    }

    pub fn put_u64_le(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f32_le(&mut self, v: f32) {
        self.put_u32_le(v.to_bits());
    }

    pub fn put_uuid(&mut self, v: Uuid) {
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn put_vec3(&mut self, v: Vec3) {
        self.put_f32_le(v.x);
        self.put_f32_le(v.y);
        self.put_f32_le(v.z);
    }

    pub fn put_vec4(&mut self, v: Vec4) {
        self.put_f32_le(v.x);
        self.put_f32_le(v.y);
        self.put_f32_le(v.z);
        self.put_f32_le(v.w);
    }

    /// 12-byte normalized quaternion; the sign is folded into x/y/z so that
    /// w can be recomputed as a non-negative root.
    pub fn put_quat_norm3(&mut self, q: Quat) {
        let q = q.normalize();
        let s = if q.w < 0.0 { -1.0 } else { 1.0 };
        self.put_f32_le(q.x * s);
        self.put_f32_le(q.y * s);
        self.put_f32_le(q.z * s);
    }

    pub fn put_var1(&mut self, b: &[u8]) {
        debug_assert!(b.len() <= u8::MAX as usize);
        self.put_u8(b.len() as u8);
        self.put_bytes(b);
    }

    pub fn put_var2(&mut self, b: &[u8]) {
        debug_assert!(b.len() <= u16::MAX as usize);
        self.put_u16_le(b.len() as u16);
        self.put_bytes(b);
    }

    pub fn put_cstr(&mut self, b: &[u8]) {
        self.put_bytes(b);
        self.put_u8(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trip() {
        let mut w = Writer::new();
        w.put_u8(7);
        w.put_u16_le(0x1234);
        w.put_u32_be(0xDEADBEEF);
        w.put_f32_le(1.5);
        w.put_vec3(Vec3::new(1.0, 2.0, 3.0));
        let buf = w.into_inner();

        let mut r = Reader::new(&buf);
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.u16_le().unwrap(), 0x1234);
        assert_eq!(r.u32_be().unwrap(), 0xDEADBEEF);
        assert_eq!(r.f32_le().unwrap(), 1.5);
        assert_eq!(r.vec3().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert!(r.is_empty());
    }

    #[test]
    fn truncation_is_reported() {
        let mut r = Reader::new(&[1, 2]);
        let err = r.u32_le().unwrap_err();
        assert_eq!(
            err,
            CodecError::PayloadTruncated {
                needed: 4,
                remaining: 2
            }
        );
    }

    #[test]
    fn var_fields() {
        let mut w = Writer::new();
        w.put_var1(b"abc");
        w.put_var2(b"defg");
        let buf = w.into_inner();

        let mut r = Reader::new(&buf);
        assert_eq!(r.var1().unwrap(), b"abc");
        assert_eq!(r.var2().unwrap(), b"defg");
    }

    #[test]
    fn quat_round_trip_recovers_w() {
        let q = Quat::from_axis_angle(Vec3::Y, 1.2);
        let mut w = Writer::new();
        w.put_quat_norm3(q);
        let buf = w.into_inner();
        assert_eq!(buf.len(), 12);

        let back = Reader::new(&buf).quat_norm3().unwrap();
        assert!(q.dot(back).abs() > 0.9999);
    }

    #[test]
    fn block_count_overflow() {
        // claims 10 blocks of at least 4 bytes with only 2 bytes left
        let mut r = Reader::new(&[10, 0, 0]);
        let err = r.block_count(4).unwrap_err();
        assert!(matches!(err, CodecError::BlockCountOverflow { count: 10, .. }));
    }

    #[test]
    fn cstr_reads_to_terminator() {
        let mut r = Reader::new(b"hello\0rest");
        assert_eq!(r.cstr().unwrap(), b"hello");
        assert_eq!(r.remaining(), 4);
    }
}
