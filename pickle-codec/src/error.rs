use thiserror::Error;

use crate::record::RecordKind;

/// Errors produced while encoding or decoding records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("empty record")]
    EmptyRecord,

    #[error("unknown record discriminator: {0}")]
    UnknownKind(u8),

    #[error("record kind mismatch: expected {expected:?}, found {found:?}")]
    KindMismatch {
        expected: RecordKind,
        found: RecordKind,
    },

    #[error("malformed payload: {reason}")]
    Malformed { reason: String },

    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value out of range for {target}")]
    OutOfRange { target: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mismatch_display() {
        let err = CodecError::KindMismatch {
            expected: RecordKind::Data,
            found: RecordKind::Meta,
        };
        let msg = err.to_string();
        assert!(msg.contains("Data"));
        assert!(msg.contains("Meta"));
    }

    #[test]
    fn test_unknown_kind_display() {
        assert!(CodecError::UnknownKind(7).to_string().contains('7'));
    }
}
