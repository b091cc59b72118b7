//! Self-describing record encoding for pickle maps.
//!
//! Every stored key and value is a [`Value`] tree serialized with borsh and
//! prefixed with a one-byte [`RecordKind`]. Types opt in through the
//! [`Pickle`] trait; [`text`] adds a base64/gzip framing for text columns.

pub mod error;
pub mod pickle;
pub mod record;
pub mod text;
pub mod value;

#[cfg(test)]
mod proptest_tests;

pub use error::CodecError;
pub use pickle::{Blob, Pickle};
pub use record::{
    compare_records, decode, decode_expecting, decode_value, decode_with_kind, encode,
    encode_value, RecordKind,
};
pub use text::{decode_text, encode_text, text_to_record, MAX_INFLATED_LEN};
pub use value::{Value, MAX_DEPTH};
