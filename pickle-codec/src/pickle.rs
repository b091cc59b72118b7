//! The shape registry: every type that can live in a pickle map says how it
//! maps to and from a [`Value`].
//!
//! There is no runtime reflection. A type is storable exactly when it
//! implements [`Pickle`], and the set of implementations is fixed at compile
//! time, which keeps the wire format auditable.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

use crate::error::CodecError;
use crate::value::Value;

/// Conversion between a Rust type and the self-describing [`Value`] tree.
pub trait Pickle: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, CodecError>;
}

fn mismatch(expected: &'static str, found: &Value) -> CodecError {
    CodecError::ShapeMismatch {
        expected,
        found: found.shape(),
    }
}

/// Raw bytes stored as a single [`Value::Bytes`] node.
///
/// `Vec<u8>` goes through the generic sequence impl and becomes a list of
/// integers; wrap byte buffers in `Blob` to keep them compact.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }
}

impl Pickle for Blob {
    fn to_value(&self) -> Value {
        Value::Bytes(self.0.clone())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Bytes(b) => Ok(Blob(b)),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl Pickle for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        Ok(value)
    }
}

impl Pickle for () {
    fn to_value(&self) -> Value {
        Value::Null
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Null => Ok(()),
            other => Err(mismatch("null", &other)),
        }
    }
}

impl Pickle for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

macro_rules! pickle_signed {
    ($($t:ty),*) => {$(
        impl Pickle for $t {
            fn to_value(&self) -> Value {
                Value::Int(i64::from(*self))
            }

            fn from_value(value: Value) -> Result<Self, CodecError> {
                match value {
                    Value::Int(i) => <$t>::try_from(i).map_err(|_| CodecError::OutOfRange {
                        target: stringify!($t),
                    }),
                    other => Err(mismatch("int", &other)),
                }
            }
        }
    )*};
}

macro_rules! pickle_unsigned {
    ($($t:ty),*) => {$(
        impl Pickle for $t {
            fn to_value(&self) -> Value {
                Value::UInt(u64::from(*self))
            }

            fn from_value(value: Value) -> Result<Self, CodecError> {
                match value {
                    Value::UInt(u) => <$t>::try_from(u).map_err(|_| CodecError::OutOfRange {
                        target: stringify!($t),
                    }),
                    other => Err(mismatch("uint", &other)),
                }
            }
        }
    )*};
}

pickle_signed!(i8, i16, i32, i64);
pickle_unsigned!(u8, u16, u32, u64);

impl Pickle for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Float(f) => Ok(f),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl Pickle for f32 {
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Float(f) => {
                let narrowed = f as f32;
                if f.is_finite() && !narrowed.is_finite() {
                    return Err(CodecError::OutOfRange { target: "f32" });
                }
                Ok(narrowed)
            }
            other => Err(mismatch("float", &other)),
        }
    }
}

impl Pickle for char {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Text(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(CodecError::OutOfRange { target: "char" }),
                }
            }
            other => Err(mismatch("text", &other)),
        }
    }
}

impl Pickle for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl<T: Pickle> Pickle for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: Pickle> Pickle for Box<T> {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        T::from_value(value).map(Box::new)
    }
}

impl<T: Pickle> Pickle for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Pickle::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<T: Pickle + Ord> Pickle for BTreeSet<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Pickle::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<K: Pickle + Ord, V: Pickle> Pickle for BTreeMap<K, V> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

impl<K: Pickle + Eq + Hash, V: Pickle> Pickle for HashMap<K, V> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

fn take_tuple(value: Value, arity: usize) -> Result<Vec<Value>, CodecError> {
    match value {
        Value::List(items) if items.len() == arity => Ok(items),
        Value::List(_) => Err(CodecError::Malformed {
            reason: format!("expected a tuple of {} elements", arity),
        }),
        other => Err(mismatch("list", &other)),
    }
}

impl<A: Pickle, B: Pickle> Pickle for (A, B) {
    fn to_value(&self) -> Value {
        Value::List(vec![self.0.to_value(), self.1.to_value()])
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        let mut items = take_tuple(value, 2)?.into_iter();
        match (items.next(), items.next()) {
            (Some(a), Some(b)) => Ok((A::from_value(a)?, B::from_value(b)?)),
            _ => Err(CodecError::Malformed {
                reason: "truncated tuple".to_string(),
            }),
        }
    }
}

impl<A: Pickle, B: Pickle, C: Pickle> Pickle for (A, B, C) {
    fn to_value(&self) -> Value {
        Value::List(vec![
            self.0.to_value(),
            self.1.to_value(),
            self.2.to_value(),
        ])
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        let mut items = take_tuple(value, 3)?.into_iter();
        match (items.next(), items.next(), items.next()) {
            (Some(a), Some(b), Some(c)) => {
                Ok((A::from_value(a)?, B::from_value(b)?, C::from_value(c)?))
            }
            _ => Err(CodecError::Malformed {
                reason: "truncated tuple".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn through_value<T: Pickle + PartialEq + std::fmt::Debug>(v: T) {
        let back = T::from_value(v.to_value()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_primitives() {
        through_value(());
        through_value(true);
        through_value(-42i32);
        through_value(u64::MAX);
        through_value(1.5f64);
        through_value('x');
        through_value("hello".to_string());
    }

    #[test]
    fn test_containers() {
        through_value(vec![1i64, 2, 3]);
        through_value(Some("a".to_string()));
        through_value(Option::<i64>::None);
        through_value((1u8, "two".to_string()));
        through_value((1i16, 2u16, Blob(vec![3])));

        let mut m = BTreeMap::new();
        m.insert("k".to_string(), vec![Some(1i64), None]);
        through_value(m);
    }

    #[test]
    fn test_out_of_range_integer() {
        let err = i8::from_value(Value::Int(300)).unwrap_err();
        assert_eq!(err, CodecError::OutOfRange { target: "i8" });
    }

    #[test]
    fn test_shape_mismatch() {
        let err = String::from_value(Value::Int(1)).unwrap_err();
        assert_eq!(
            err,
            CodecError::ShapeMismatch {
                expected: "text",
                found: "int"
            }
        );
    }

    #[test]
    fn test_wrong_tuple_arity() {
        let v = Value::List(vec![Value::Int(1)]);
        assert!(matches!(
            <(i64, i64)>::from_value(v),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn test_multi_char_text_is_not_a_char() {
        assert!(char::from_value(Value::Text("ab".into())).is_err());
    }
}
