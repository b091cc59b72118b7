//! Printable record framing: `base64(optionally-gzip(record))`.
//!
//! Used where keys and values must live in text columns.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::CodecError;
use crate::pickle::Pickle;
use crate::record::{decode, encode, RecordKind};

/// Largest record a compressed text column may inflate to.
pub const MAX_INFLATED_LEN: u64 = 64 * 1024 * 1024;

/// Encode `value` as a record and frame it as base64 text.
pub fn encode_text<T: Pickle>(
    kind: RecordKind,
    value: &T,
    compressed: bool,
) -> Result<String, CodecError> {
    let record = encode(kind, value)?;
    let bytes = if compressed { gzip(&record)? } else { record };
    Ok(STANDARD.encode(bytes))
}

/// Inverse of [`encode_text`]. `compressed` must match the encoding side.
pub fn decode_text<T: Pickle>(text: &str, compressed: bool) -> Result<T, CodecError> {
    decode(&text_to_record(text, compressed)?)
}

/// Strip the text framing, leaving the binary record with its kind byte.
pub fn text_to_record(text: &str, compressed: bool) -> Result<Vec<u8>, CodecError> {
    let bytes = STANDARD.decode(text).map_err(|e| CodecError::Malformed {
        reason: format!("invalid base64: {}", e),
    })?;
    if compressed {
        gunzip(&bytes, MAX_INFLATED_LEN)
    } else {
        Ok(bytes)
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| CodecError::Serialization {
            reason: format!("gzip failed: {}", e),
        })
}

fn gunzip(bytes: &[u8], limit: u64) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .take(limit + 1)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Malformed {
            reason: format!("invalid gzip stream: {}", e),
        })?;
    if out.len() as u64 > limit {
        return Err(CodecError::Malformed {
            reason: format!("gzip stream inflates past {} bytes", limit),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_plain_text_roundtrip() {
        let text = encode_text(RecordKind::Data, &vec![1i64, 2, 3], false).unwrap();
        assert!(text.is_ascii());
        let back: Vec<i64> = decode_text(&text, false).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn test_compressed_text_roundtrip() {
        let long = "pickle ".repeat(200);
        let plain = encode_text(RecordKind::Data, &long, false).unwrap();
        let packed = encode_text(RecordKind::Data, &long, true).unwrap();
        assert!(packed.len() < plain.len());
        let back: String = decode_text(&packed, true).unwrap();
        assert_eq!(back, long);
    }

    #[test]
    fn test_compression_is_deterministic() {
        let a = encode_text(RecordKind::Data, &"key".to_string(), true).unwrap();
        let b = encode_text(RecordKind::Data, &"key".to_string(), true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flag_mismatch_fails() {
        let plain = encode_text(RecordKind::Data, &Value::Int(5), false).unwrap();
        assert!(matches!(
            decode_text::<Value>(&plain, true),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn test_inflation_is_capped() {
        let record = vec![0u8; 4096];
        let packed = gzip(&record).unwrap();
        assert!(packed.len() < 256);
        assert_eq!(gunzip(&packed, 4096).unwrap(), record);
        assert!(matches!(
            gunzip(&packed, 4095),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn test_invalid_base64() {
        assert!(matches!(
            decode_text::<Value>("***", false),
            Err(CodecError::Malformed { .. })
        ));
    }
}
