//! Record framing: `[1-byte kind][borsh-encoded Value]`.
//!
//! The kind byte keeps internal bookkeeping records (META) in a separate
//! namespace from user material (DATA), even when their payloads are
//! byte-for-byte identical.

use std::cmp::Ordering;

use borsh::BorshDeserialize;

use crate::error::CodecError;
use crate::pickle::Pickle;
use crate::value::{Value, MAX_DEPTH};

/// Discriminator stored in byte 0 of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    Data = 0,
    Meta = 1,
}

impl RecordKind {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = CodecError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(RecordKind::Data),
            1 => Ok(RecordKind::Meta),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// Encode an already built [`Value`] as a record of the given kind.
///
/// Values nested deeper than [`MAX_DEPTH`] are refused, matching what
/// [`decode_value`] accepts.
pub fn encode_value(kind: RecordKind, value: &Value) -> Result<Vec<u8>, CodecError> {
    if value.exceeds_max_depth() {
        return Err(CodecError::Serialization {
            reason: format!("value nested deeper than {} levels", MAX_DEPTH),
        });
    }
    let mut out = vec![kind.as_byte()];
    borsh::to_writer(&mut out, value).map_err(|e| CodecError::Serialization {
        reason: e.to_string(),
    })?;
    Ok(out)
}

/// Encode any [`Pickle`] value as a record of the given kind.
pub fn encode<T: Pickle>(kind: RecordKind, value: &T) -> Result<Vec<u8>, CodecError> {
    encode_value(kind, &value.to_value())
}

/// Split a record into its kind and decoded value tree.
///
/// Exactly one discriminator byte is stripped; the remainder must be one
/// complete value with no trailing bytes.
pub fn decode_with_kind(bytes: &[u8]) -> Result<(RecordKind, Value), CodecError> {
    let (&first, payload) = bytes.split_first().ok_or(CodecError::EmptyRecord)?;
    let kind = RecordKind::try_from(first)?;
    let value = Value::try_from_slice(payload).map_err(|e| CodecError::Malformed {
        reason: e.to_string(),
    })?;
    Ok((kind, value))
}

/// Decode a record of either kind into a value tree.
pub fn decode_value(bytes: &[u8]) -> Result<Value, CodecError> {
    decode_with_kind(bytes).map(|(_, value)| value)
}

/// Decode a record of either kind into `T`.
pub fn decode<T: Pickle>(bytes: &[u8]) -> Result<T, CodecError> {
    T::from_value(decode_value(bytes)?)
}

/// Decode a record into `T`, failing if its kind is not `expected`.
pub fn decode_expecting<T: Pickle>(expected: RecordKind, bytes: &[u8]) -> Result<T, CodecError> {
    let (found, value) = decode_with_kind(bytes)?;
    if found != expected {
        return Err(CodecError::KindMismatch { expected, found });
    }
    T::from_value(value)
}

/// Total order over encoded records: kind first, then the decoded values.
///
/// Records that fail to decode sort after every decodable record of the same
/// kind, ordered bytewise among themselves, so the comparator stays total.
pub fn compare_records(a: &[u8], b: &[u8]) -> Ordering {
    match (decode_with_kind(a), decode_with_kind(b)) {
        (Ok((ka, va)), Ok((kb, vb))) => ka
            .as_byte()
            .cmp(&kb.as_byte())
            .then_with(|| va.cmp(&vb)),
        (Ok(_), Err(_)) => a.first().cmp(&b.first()).then(Ordering::Less),
        (Err(_), Ok(_)) => a.first().cmp(&b.first()).then(Ordering::Greater),
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_starts_with_kind_byte() {
        let data = encode(RecordKind::Data, &7i64).unwrap();
        let meta = encode(RecordKind::Meta, &7i64).unwrap();
        assert_eq!(data[0], 0);
        assert_eq!(meta[0], 1);
        assert_eq!(data[1..], meta[1..]);
    }

    #[test]
    fn test_roundtrip() {
        let bytes = encode(RecordKind::Data, &"abc".to_string()).unwrap();
        let back: String = decode(&bytes).unwrap();
        assert_eq!(back, "abc");
    }

    #[test]
    fn test_namespace_separation() {
        let data = encode(RecordKind::Data, &"size".to_string()).unwrap();
        let meta = encode(RecordKind::Meta, &"size".to_string()).unwrap();
        assert_ne!(data, meta);

        let err = decode_expecting::<String>(RecordKind::Data, &meta).unwrap_err();
        assert_eq!(
            err,
            CodecError::KindMismatch {
                expected: RecordKind::Data,
                found: RecordKind::Meta
            }
        );
        assert!(decode_expecting::<String>(RecordKind::Meta, &meta).is_ok());
    }

    #[test]
    fn test_unknown_discriminator() {
        let mut bytes = encode(RecordKind::Data, &1u8).unwrap();
        bytes[0] = 9;
        assert_eq!(
            decode::<u8>(&bytes).unwrap_err(),
            CodecError::UnknownKind(9)
        );
    }

    #[test]
    fn test_empty_record() {
        assert_eq!(decode_value(&[]).unwrap_err(), CodecError::EmptyRecord);
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut bytes = encode(RecordKind::Data, &true).unwrap();
        bytes.push(0xAA);
        assert!(matches!(
            decode_value(&bytes),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unknown_value_tag_is_corrupt() {
        // Kind byte is fine, but 0x7F is not a Value variant.
        assert!(matches!(
            decode_value(&[0, 0x7F]),
            Err(CodecError::Malformed { .. })
        ));
    }

    fn deeply_nested_record(levels: usize) -> Vec<u8> {
        // kind byte, then `levels` one-element lists around a Null
        let mut bytes = vec![RecordKind::Data.as_byte()];
        for _ in 0..levels {
            bytes.extend_from_slice(&[7, 1, 0, 0, 0]);
        }
        bytes.push(0);
        bytes
    }

    #[test]
    fn test_deep_nesting_is_corrupt_not_fatal() {
        let bytes = deeply_nested_record(20_000);
        assert!(matches!(
            decode_value(&bytes),
            Err(CodecError::Malformed { .. })
        ));
        let shallow = encode(RecordKind::Data, &1i64).unwrap();
        assert_eq!(compare_records(&shallow, &bytes), Ordering::Less);
    }

    #[test]
    fn test_depth_limit_is_symmetric() {
        let at_limit = deeply_nested_record(MAX_DEPTH);
        let value = decode_value(&at_limit).unwrap();
        assert_eq!(encode_value(RecordKind::Data, &value).unwrap(), at_limit);

        let past_limit = Value::List(vec![value]);
        assert!(matches!(
            encode_value(RecordKind::Data, &past_limit),
            Err(CodecError::Serialization { .. })
        ));
        assert!(decode_value(&deeply_nested_record(MAX_DEPTH + 1)).is_err());
    }

    #[test]
    fn test_nan_rejected() {
        assert!(matches!(
            encode(RecordKind::Data, &f64::NAN),
            Err(CodecError::Serialization { .. })
        ));
    }

    #[test]
    fn test_compare_records_uses_value_order() {
        let a = encode(RecordKind::Data, &-10i64).unwrap();
        let b = encode(RecordKind::Data, &3i64).unwrap();
        // Little-endian two's complement would order these the other way.
        assert!(a > b);
        assert_eq!(compare_records(&a, &b), Ordering::Less);

        let meta = encode(RecordKind::Meta, &-100i64).unwrap();
        assert_eq!(compare_records(&b, &meta), Ordering::Less);
    }
}
