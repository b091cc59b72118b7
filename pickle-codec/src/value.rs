//! The self-describing value tree every pickled record is built from.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{self, Read};

use borsh::{BorshDeserialize, BorshSerialize};

/// Deepest container nesting a record may carry below its root value.
pub const MAX_DEPTH: usize = 128;

/// A dynamically typed value.
///
/// Each node serializes with its own variant tag, so a payload can be read
/// back without any externally supplied schema. Deserialization is written
/// by hand so nesting past [`MAX_DEPTH`] is an error instead of unbounded
/// recursion.
#[derive(Debug, Clone, BorshSerialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// NaN is not representable; encoding one fails.
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<Value, Value>),
}

impl Value {
    /// Short name of the variant, used in shape mismatch errors.
    pub fn shape(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether any container sits more than [`MAX_DEPTH`] levels below this one.
    pub fn exceeds_max_depth(&self) -> bool {
        self.nested_past(0)
    }

    fn nested_past(&self, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return true;
        }
        match self {
            Value::List(items) => items.iter().any(|v| v.nested_past(depth + 1)),
            Value::Map(entries) => entries
                .iter()
                .any(|(k, v)| k.nested_past(depth + 1) || v.nested_past(depth + 1)),
            _ => false,
        }
    }

    fn read_at<R: Read>(reader: &mut R, depth: usize) -> io::Result<Self> {
        if depth > MAX_DEPTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("value nested deeper than {} levels", MAX_DEPTH),
            ));
        }
        let value = match u8::deserialize_reader(reader)? {
            0 => Value::Null,
            1 => Value::Bool(bool::deserialize_reader(reader)?),
            2 => Value::Int(i64::deserialize_reader(reader)?),
            3 => Value::UInt(u64::deserialize_reader(reader)?),
            4 => Value::Float(f64::deserialize_reader(reader)?),
            5 => Value::Text(String::deserialize_reader(reader)?),
            6 => Value::Bytes(Vec::<u8>::deserialize_reader(reader)?),
            7 => {
                // no preallocation from an untrusted length
                let len = u32::deserialize_reader(reader)?;
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(Self::read_at(reader, depth + 1)?);
                }
                Value::List(items)
            }
            8 => {
                let len = u32::deserialize_reader(reader)?;
                let mut entries = BTreeMap::new();
                for _ in 0..len {
                    let key = Self::read_at(reader, depth + 1)?;
                    let value = Self::read_at(reader, depth + 1)?;
                    entries.insert(key, value);
                }
                Value::Map(entries)
            }
            tag => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown value tag {}", tag),
                ))
            }
        };
        Ok(value)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::UInt(_) => 3,
            Value::Float(_) => 4,
            Value::Text(_) => 5,
            Value::Bytes(_) => 6,
            Value::List(_) => 7,
            Value::Map(_) => 8,
        }
    }
}

// Ordering is total: variants are ranked in declaration order, and floats
// use `total_cmp`. Equality is defined through the same comparison so the
// two never disagree.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.iter().cmp(b.iter()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl BorshDeserialize for Value {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        Self::read_at(reader, 0)
    }
}
