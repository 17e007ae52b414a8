use crate::codec::CodecError;

/// Per-circuit bandwidth budget across the seven traffic classes, in
/// bits per second. The wire form is exactly seven consecutive
/// little-endian floats in field order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throttle {
    pub resend: f32,
    pub land: f32,
    pub wind: f32,
    pub cloud: f32,
    pub task: f32,
    pub texture: f32,
    pub asset: f32,
}

pub const THROTTLE_BYTES: usize = 28;

/// Distribution weights used when a single total is split across classes.
const WEIGHTS: [f32; 7] = [0.1, 0.173, 0.05, 0.05, 0.235, 0.235, 0.161];

const CLAMPS: [(f32, f32); 7] = [
    (10_000.0, 150_000.0),   // resend
    (0.0, 170_000.0),        // land
    (0.0, 34_000.0),         // wind
    (0.0, 34_000.0),         // cloud
    (4_000.0, 1_338_000.0),  // task
    (4_000.0, 446_000.0),    // texture
    (10_000.0, 220_000.0),   // asset
];

pub const DEFAULT_TOTAL: f32 = 1_536_000.0;

impl Default for Throttle {
    fn default() -> Self {
        Self::from_total(DEFAULT_TOTAL)
    }
}

impl Throttle {
    /// Split a total budget across the classes by the fixed weights, then
    /// clamp each class into its legal range.
    pub fn from_total(total: f32) -> Self {
        let sum: f32 = WEIGHTS.iter().sum();
        let rates: Vec<f32> = WEIGHTS.iter().map(|w| total * w / sum).collect();
        Self {
            resend: rates[0],
            land: rates[1],
            wind: rates[2],
            cloud: rates[3],
            task: rates[4],
            texture: rates[5],
            asset: rates[6],
        }
        .clamped()
    }

    pub fn total(&self) -> f32 {
        self.as_array().iter().sum()
    }

    pub fn as_array(&self) -> [f32; 7] {
        [
            self.resend,
            self.land,
            self.wind,
            self.cloud,
            self.task,
            self.texture,
            self.asset,
        ]
    }

    fn from_array(a: [f32; 7]) -> Self {
        Self {
            resend: a[0],
            land: a[1],
            wind: a[2],
            cloud: a[3],
            task: a[4],
            texture: a[5],
            asset: a[6],
        }
    }

    pub fn clamped(&self) -> Self {
        let mut a = self.as_array();
        for (v, (lo, hi)) in a.iter_mut().zip(CLAMPS) {
            *v = v.clamp(lo, hi);
        }
        Self::from_array(a)
    }

    pub fn to_bytes(&self) -> [u8; THROTTLE_BYTES] {
        let mut out = [0u8; THROTTLE_BYTES];
        for (chunk, v) in out.chunks_exact_mut(4).zip(self.clamped().as_array()) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < THROTTLE_BYTES {
            return Err(CodecError::PayloadTruncated {
                needed: THROTTLE_BYTES,
                remaining: data.len(),
            });
        }
        let mut a = [0.0f32; 7];
        for (v, chunk) in a.iter_mut().zip(data.chunks_exact(4)) {
            *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self::from_array(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_form_is_28_le_floats() {
        let t = Throttle::default();
        let bytes = t.to_bytes();
        assert_eq!(bytes.len(), 28);
        assert_eq!(
            f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            t.clamped().resend
        );
    }

    #[test]
    fn round_trip_equals_clamp() {
        let t = Throttle {
            resend: 1.0,             // below floor
            land: 500_000.0,         // above ceiling
            wind: 10_000.0,
            cloud: 0.0,
            task: 100_000.0,
            texture: 100_000.0,
            asset: 50_000.0,
        };
        let back = Throttle::from_bytes(&t.to_bytes()).unwrap();
        assert_eq!(back, t.clamped());
        assert_eq!(back.resend, 10_000.0);
        assert_eq!(back.land, 170_000.0);
    }

    #[test]
    fn total_distribution() {
        let t = Throttle::from_total(500_000.0);
        // every class within its clamp and roughly proportional
        assert!(t.resend >= 10_000.0 && t.resend <= 150_000.0);
        assert!((t.task - t.texture).abs() < 1.0);
        assert!(t.total() > 400_000.0);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(matches!(
            Throttle::from_bytes(&[0u8; 20]),
            Err(CodecError::PayloadTruncated { .. })
        ));
    }
}
