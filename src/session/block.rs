//! IEEE 488.2 definite-length arbitrary block framing.
//!
//! A block is `#` followed by one digit `n`, then `n` ASCII digits giving the
//! payload length, then the payload itself: `#15hello`.

use crate::error::{DriverError, DriverResult};

/// Largest payload we accept when decoding (64 MiB).
pub const MAX_BLOCK_BYTES: usize = 64 * 1024 * 1024;

/// Frame `payload` as a definite-length block.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len = payload.len().to_string();
    let mut out = Vec::with_capacity(2 + len.len() + payload.len());
    out.push(b'#');
    out.extend_from_slice(len.len().to_string().as_bytes());
    out.extend_from_slice(len.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Extract the payload of the block at the start of `raw`.
///
/// Leading whitespace is skipped and anything after the payload (usually the
/// line terminator) is ignored.
pub fn decode(raw: &[u8]) -> DriverResult<Vec<u8>> {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| DriverError::Block("empty block".into()))?;
    let raw = &raw[start..];

    if raw.first() != Some(&b'#') {
        return Err(DriverError::Block("missing '#' header".into()));
    }

    let digits = raw
        .get(1)
        .filter(|b| b.is_ascii_digit() && **b != b'0')
        .map(|b| usize::from(b - b'0'))
        .ok_or_else(|| {
            DriverError::Block("indefinite-length blocks are not supported".into())
        })?;

    let len_field = raw
        .get(2..2 + digits)
        .ok_or_else(|| DriverError::Block("truncated length field".into()))?;
    let len: usize = std::str::from_utf8(len_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DriverError::Block("non-numeric length field".into()))?;

    if len > MAX_BLOCK_BYTES {
        return Err(DriverError::Block(format!(
            "payload of {} bytes exceeds limit of {} bytes",
            len, MAX_BLOCK_BYTES
        )));
    }

    let body = 2 + digits;
    raw.get(body..body + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            DriverError::Block(format!(
                "expected {} payload bytes, got {}",
                len,
                raw.len() - body
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header() {
        assert_eq!(encode(b"hello"), b"#15hello".to_vec());
        assert_eq!(&encode(&[0u8; 12])[..4], b"#212");
    }

    #[test]
    fn test_encode_empty_payload() {
        assert_eq!(encode(b""), b"#10".to_vec());
    }

    #[test]
    fn test_decode_ignores_terminator_and_leading_space() {
        let payload = decode(b"  #15hello\n").unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_decode_binary_payload() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&encode(&data)).unwrap(), data);
    }

    #[test]
    fn test_decode_rejects_missing_hash() {
        assert!(matches!(decode(b"15hello"), Err(DriverError::Block(_))));
    }

    #[test]
    fn test_decode_rejects_indefinite_length() {
        assert!(decode(b"#0hello\n").is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let err = decode(b"#210short").unwrap_err();
        assert!(err.to_string().contains("expected 10 payload bytes, got 5"));
    }
}
