//! Side counter for engines without native cardinality.
//!
//! The live key count is stored as a META record under the encoded key
//! `"size"`, so it can never collide with a user key. Every mutation writes
//! the new count in the same batch as the data change.

use pickle_codec::{decode_expecting, encode, RecordKind};

use crate::error::MapError;
use crate::traits::BatchOp;

pub const SIZE_KEY_NAME: &str = "size";

/// Encoded META key holding the counter.
pub fn size_key() -> Result<Vec<u8>, MapError> {
    Ok(encode(RecordKind::Meta, &SIZE_KEY_NAME.to_string())?)
}

/// Decode a stored counter. An absent record means zero.
pub fn read_size(raw: Option<&[u8]>) -> Result<u64, MapError> {
    match raw {
        Some(bytes) => Ok(decode_expecting(RecordKind::Meta, bytes)?),
        None => Ok(0),
    }
}

/// Batch operation that stores `size` as the new counter value.
pub fn size_op(size: u64) -> Result<BatchOp, MapError> {
    Ok(BatchOp::Put {
        key: size_key()?,
        value: encode(RecordKind::Meta, &size)?,
    })
}

/// Apply a signed delta to a count without wrapping.
pub fn apply_delta(size: u64, delta: i64) -> u64 {
    if delta >= 0 {
        size.saturating_add(delta as u64)
    } else {
        size.saturating_sub(delta.unsigned_abs())
    }
}

/// Change in distinct-key count caused by a single write.
pub fn put_delta(existed: bool) -> i64 {
    if existed {
        0
    } else {
        1
    }
}

pub fn remove_delta(existed: bool) -> i64 {
    if existed {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickle_codec::encode;

    #[test]
    fn test_size_key_is_meta_and_distinct_from_user_key() {
        let meta = size_key().unwrap();
        let user = encode(RecordKind::Data, &"size".to_string()).unwrap();
        assert_eq!(meta[0], RecordKind::Meta.as_byte());
        assert_ne!(meta, user);
        assert_eq!(meta[1..], user[1..]);
    }

    #[test]
    fn test_read_size_defaults_to_zero() {
        assert_eq!(read_size(None).unwrap(), 0);
        let BatchOp::Put { value, .. } = size_op(42).unwrap() else {
            panic!("expected put");
        };
        assert_eq!(read_size(Some(&value)).unwrap(), 42);
    }

    #[test]
    fn test_data_record_is_not_a_counter() {
        let bogus = encode(RecordKind::Data, &7u64).unwrap();
        assert!(matches!(
            read_size(Some(&bogus)),
            Err(MapError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_apply_delta_saturates() {
        assert_eq!(apply_delta(3, 2), 5);
        assert_eq!(apply_delta(3, -1), 2);
        assert_eq!(apply_delta(0, -1), 0);
        assert_eq!(apply_delta(5, put_delta(true)), 5);
        assert_eq!(apply_delta(5, put_delta(false)), 6);
        assert_eq!(apply_delta(5, remove_delta(true)), 4);
        assert_eq!(apply_delta(5, remove_delta(false)), 5);
    }
}
