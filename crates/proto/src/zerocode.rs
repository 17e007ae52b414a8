//! Run-length compaction of zero bytes in packet bodies.
//!
//! A literal `0x00` introduces a run; the next byte is the run length.
//! Runs longer than 255 are emitted as repeated `00 FF` groups. The
//! message id bytes are never part of the coded region.

use crate::codec::CodecError;

/// Expand a zerocoded body back to its literal form.
pub fn expand(src: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(src.len() * 2);
    let mut i = 0;
    while i < src.len() {
        if src[i] == 0 {
            let Some(&count) = src.get(i + 1) else {
                return Err(CodecError::BadZeroRun);
            };
            if count == 0 {
                return Err(CodecError::BadZeroRun);
            }
            out.resize(out.len() + count as usize, 0);
            i += 2;
        } else {
            out.push(src[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Compact runs of zero bytes. Always succeeds; the result may be larger
/// than the input when it contains many isolated zeros.
pub fn compact(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        if src[i] == 0 {
            let mut run = 0usize;
            while i < src.len() && src[i] == 0 {
                run += 1;
                i += 1;
            }
            while run > u8::MAX as usize {
                out.push(0);
                out.push(u8::MAX);
                run -= u8::MAX as usize;
            }
            out.push(0);
            out.push(run as u8);
        } else {
            out.push(src[i]);
            i += 1;
        }
    }
    out
}

/// Whether a compacted variant should be sent: it must actually shrink the
/// body, and a body whose first byte is `0xFF` is never coded.
pub fn is_beneficial(body: &[u8], compacted: &[u8]) -> bool {
    compacted.len() < body.len() && body.first() != Some(&0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let body = [0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03];
        let coded = compact(&body);
        assert_eq!(coded, [0x01, 0x00, 0x03, 0x02, 0x00, 0x05, 0x03]);
        assert_eq!(expand(&coded).unwrap(), body);
    }

    #[test]
    fn long_run_splits() {
        let body = vec![0u8; 300];
        let coded = compact(&body);
        assert_eq!(coded, [0x00, 0xFF, 0x00, 45]);
        assert_eq!(expand(&coded).unwrap(), body);
    }

    #[test]
    fn truncated_run_is_an_error() {
        assert_eq!(expand(&[0x01, 0x00]), Err(CodecError::BadZeroRun));
    }

    #[test]
    fn zero_count_is_an_error() {
        assert_eq!(expand(&[0x00, 0x00]), Err(CodecError::BadZeroRun));
    }

    #[test]
    fn benefit_check() {
        let body = [0x01, 0x00, 0x00, 0x00, 0x00, 0x02];
        let coded = compact(&body);
        assert!(is_beneficial(&body, &coded));

        // isolated zeros grow under coding
        let body = [0x01, 0x00, 0x02, 0x00, 0x03];
        let coded = compact(&body);
        assert!(!is_beneficial(&body, &coded));

        // a leading 0xFF disables coding regardless of payoff
        let body = [0xFF, 0x00, 0x00, 0x00, 0x00, 0x00];
        let coded = compact(&body);
        assert!(!is_beneficial(&body, &coded));
    }
}
