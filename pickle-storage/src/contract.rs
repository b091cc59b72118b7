//! The typed map contract shared by every adapter.
//!
//! [`MapLike`] is the base capability. Adapters whose engine can navigate by
//! key also implement [`OrderedMapLike`]; adapters that keep duplicate keys
//! implement [`MultiMapLike`]. Callers reach the optional capabilities through
//! [`MapLike::as_ordered`] and [`MapLike::as_multi`], which fail with
//! [`MapError::Unsupported`] instead of emulating anything with a full scan.

use std::marker::PhantomData;
use std::ops::Bound;

use pickle_codec::{decode_expecting, encode, Pickle, RecordKind};

use crate::error::MapError;
use crate::traits::KvPairs;

/// What a handle's backend can do natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// neighbour and range queries under the key comparator
    pub ordered: bool,
    /// the same key may be stored more than once
    pub duplicates: bool,
    /// O(1) cardinality without a side counter
    pub native_size: bool,
    /// entries can be replaced and removed after they are written
    pub mutable: bool,
}

pub(crate) type RawPairs<'a> =
    Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), MapError>> + 'a>;

/// Lazy cursor over a backend's iteration order. Records are decoded as the
/// cursor advances, so a corrupt record surfaces at its position.
pub struct Cursor<'a, K, V> {
    inner: RawPairs<'a>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K: Pickle, V: Pickle> Cursor<'a, K, V> {
    pub(crate) fn new(inner: RawPairs<'a>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_pairs(pairs: KvPairs) -> Self {
        Self::new(Box::new(pairs.into_iter().map(Ok)))
    }
}

impl<K: Pickle, V: Pickle> Iterator for Cursor<'_, K, V> {
    type Item = Result<(K, V), MapError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.and_then(|(k, v)| Ok((decode_data(&k)?, decode_data(&v)?))))
    }
}

/// Keys of a [`Cursor`], decoded as it advances.
pub type Keys<'a, K, V> =
    std::iter::Map<Cursor<'a, K, V>, fn(Result<(K, V), MapError>) -> Result<K, MapError>>;

/// Values of a [`Cursor`], decoded as it advances.
pub type Values<'a, K, V> =
    std::iter::Map<Cursor<'a, K, V>, fn(Result<(K, V), MapError>) -> Result<V, MapError>>;

/// Encode a caller key or value as a DATA record.
pub(crate) fn encode_data<T: Pickle>(value: &T) -> Result<Vec<u8>, MapError> {
    Ok(encode(RecordKind::Data, value)?)
}

/// Decode a stored DATA record, rejecting META records.
pub(crate) fn decode_data<T: Pickle>(bytes: &[u8]) -> Result<T, MapError> {
    Ok(decode_expecting(RecordKind::Data, bytes)?)
}

/// The engine slot of a handle. Empty once the handle is closed.
pub(crate) struct Slot<E> {
    engine: Option<E>,
}

impl<E> Slot<E> {
    pub(crate) fn new(engine: E) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    pub(crate) fn get(&self) -> Result<&E, MapError> {
        self.engine.as_ref().ok_or(MapError::ClosedHandle)
    }

    pub(crate) fn get_mut(&mut self) -> Result<&mut E, MapError> {
        self.engine.as_mut().ok_or(MapError::ClosedHandle)
    }

    pub(crate) fn take(&mut self) -> Option<E> {
        self.engine.take()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.engine.is_none()
    }
}

/// A typed key/value map over one backend instance.
///
/// Handles are single-threaded: mutating calls take `&mut self` and nothing
/// here adds locking beyond what the wrapped engine does. After
/// [`close`](MapLike::close) every call except another `close` fails with
/// [`MapError::ClosedHandle`].
pub trait MapLike<K: Pickle, V: Pickle> {
    /// Short backend name, used in log lines and `Unsupported` errors.
    fn backend(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn get(&self, key: &K) -> Result<Option<V>, MapError>;

    fn contains_key(&self, key: &K) -> Result<bool, MapError> {
        Ok(self.get(key)?.is_some())
    }

    /// Store `value` under `key`, returning the value it replaced when the
    /// engine can tell.
    fn put(&mut self, key: &K, value: &V) -> Result<Option<V>, MapError>;

    fn remove(&mut self, key: &K) -> Result<Option<V>, MapError>;

    /// Store every pair in order. Stops at the first failure, leaving the
    /// pairs before it written; adapters with atomic batches override this.
    fn put_all(&mut self, entries: &[(K, V)]) -> Result<(), MapError> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Number of distinct live keys.
    fn size(&self) -> Result<u64, MapError>;

    fn is_empty(&self) -> Result<bool, MapError> {
        Ok(self.size()? == 0)
    }

    /// Remove every entry and reset the size to zero.
    fn clear(&mut self) -> Result<(), MapError>;

    /// Every entry in the backend's natural order.
    fn entries(&self) -> Result<Cursor<'_, K, V>, MapError>;

    fn keys(&self) -> Result<Keys<'_, K, V>, MapError> {
        let project: fn(Result<(K, V), MapError>) -> Result<K, MapError> = |e| e.map(|(k, _)| k);
        Ok(self.entries()?.map(project))
    }

    fn values(&self) -> Result<Values<'_, K, V>, MapError> {
        let project: fn(Result<(K, V), MapError>) -> Result<V, MapError> = |e| e.map(|(_, v)| v);
        Ok(self.entries()?.map(project))
    }

    /// Make buffered mutations durable.
    fn flush(&mut self) -> Result<(), MapError>;

    /// Flush, release the engine and move to the closed state.
    fn close(&mut self) -> Result<(), MapError>;

    fn is_closed(&self) -> bool;

    fn as_ordered(&mut self) -> Result<&mut dyn OrderedMapLike<K, V>, MapError> {
        Err(MapError::Unsupported {
            op: "navigate",
            backend: self.backend(),
        })
    }

    fn as_multi(&self) -> Result<&dyn MultiMapLike<K, V>, MapError> {
        Err(MapError::Unsupported {
            op: "get_all",
            backend: self.backend(),
        })
    }
}

/// Sorted navigation under the backend's key comparator.
pub trait OrderedMapLike<K: Pickle, V: Pickle>: MapLike<K, V> {
    /// Greatest key strictly less than `key`.
    fn lower_key(&self, key: &K) -> Result<Option<K>, MapError>;
    /// Greatest key less than or equal to `key`.
    fn floor_key(&self, key: &K) -> Result<Option<K>, MapError>;
    /// Least key greater than or equal to `key`.
    fn ceiling_key(&self, key: &K) -> Result<Option<K>, MapError>;
    /// Least key strictly greater than `key`.
    fn higher_key(&self, key: &K) -> Result<Option<K>, MapError>;

    fn lower_entry(&self, key: &K) -> Result<Option<(K, V)>, MapError>;
    fn floor_entry(&self, key: &K) -> Result<Option<(K, V)>, MapError>;
    fn ceiling_entry(&self, key: &K) -> Result<Option<(K, V)>, MapError>;
    fn higher_entry(&self, key: &K) -> Result<Option<(K, V)>, MapError>;

    fn first_entry(&self) -> Result<Option<(K, V)>, MapError>;
    fn last_entry(&self) -> Result<Option<(K, V)>, MapError>;

    fn first_key(&self) -> Result<Option<K>, MapError> {
        Ok(self.first_entry()?.map(|(k, _)| k))
    }

    fn last_key(&self) -> Result<Option<K>, MapError> {
        Ok(self.last_entry()?.map(|(k, _)| k))
    }

    /// Remove and return the smallest entry atomically.
    fn poll_first_entry(&mut self) -> Result<Option<(K, V)>, MapError>;
    /// Remove and return the largest entry atomically.
    fn poll_last_entry(&mut self) -> Result<Option<(K, V)>, MapError>;

    /// Entries between the bounds, in key order.
    fn range(&self, from: Bound<&K>, to: Bound<&K>) -> Result<Cursor<'_, K, V>, MapError>;

    /// Entries between the bounds, largest key first.
    fn range_desc(&self, from: Bound<&K>, to: Bound<&K>) -> Result<Cursor<'_, K, V>, MapError>;

    fn descending_entries(&self) -> Result<Cursor<'_, K, V>, MapError> {
        self.range_desc(Bound::Unbounded, Bound::Unbounded)
    }

    fn head(&self, to: &K, inclusive: bool) -> Result<Cursor<'_, K, V>, MapError> {
        let to = if inclusive {
            Bound::Included(to)
        } else {
            Bound::Excluded(to)
        };
        self.range(Bound::Unbounded, to)
    }

    fn tail(&self, from: &K, inclusive: bool) -> Result<Cursor<'_, K, V>, MapError> {
        let from = if inclusive {
            Bound::Included(from)
        } else {
            Bound::Excluded(from)
        };
        self.range(from, Bound::Unbounded)
    }
}

/// Maps that retain every occurrence of a key.
pub trait MultiMapLike<K: Pickle, V: Pickle>: MapLike<K, V> {
    /// Every value stored under `key`, in insertion order.
    fn get_all(&self, key: &K) -> Result<Vec<V>, MapError>;

    /// Record count including duplicate occurrences.
    fn size_with_duplicates(&self) -> Result<u64, MapError>;
}
