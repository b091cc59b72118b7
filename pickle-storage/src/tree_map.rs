//! Ordered mutable map on the redb B-tree.
//!
//! Keys are ordered by their decoded [`Value`](pickle_codec::Value), so
//! integer keys navigate numerically and text keys lexically. The B-tree
//! tracks its own length, so no side counter is needed.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use pickle_codec::{compare_records, Pickle};

use crate::contract::{
    decode_data, encode_data, Capabilities, Cursor, MapLike, OrderedMapLike, Slot,
};
use crate::error::MapError;
use crate::tree_store::{Neighbor, TreeStore};

const BACKEND: &str = "tree";

pub struct TreeMap<K, V> {
    store: Slot<TreeStore>,
    path: Option<PathBuf>,
    _marker: PhantomData<fn() -> (K, V)>,
}

type RawEntry = (Vec<u8>, Vec<u8>);

fn encode_bound<K: Pickle>(bound: Bound<&K>) -> Result<Bound<Vec<u8>>, MapError> {
    Ok(match bound {
        Bound::Included(k) => Bound::Included(encode_data(k)?),
        Bound::Excluded(k) => Bound::Excluded(encode_data(k)?),
        Bound::Unbounded => Bound::Unbounded,
    })
}

fn borrow_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// True when no key can fall between the bounds.
fn is_empty_range(from: &Bound<Vec<u8>>, to: &Bound<Vec<u8>>) -> bool {
    let (lo, lo_inclusive) = match from {
        Bound::Included(k) => (k, true),
        Bound::Excluded(k) => (k, false),
        Bound::Unbounded => return false,
    };
    let (hi, hi_inclusive) = match to {
        Bound::Included(k) => (k, true),
        Bound::Excluded(k) => (k, false),
        Bound::Unbounded => return false,
    };
    match compare_records(lo, hi) {
        Ordering::Greater => true,
        Ordering::Equal => !(lo_inclusive && hi_inclusive),
        Ordering::Less => false,
    }
}

impl<K: Pickle, V: Pickle> TreeMap<K, V> {
    /// Open or create the database file at `path`.
    pub fn open(path: &Path, recreate: bool) -> Result<Self, MapError> {
        let store = TreeStore::open(path).map_err(MapError::open)?;
        if recreate {
            store.recreate().map_err(MapError::open)?;
        }
        tracing::info!(path = %path.display(), recreate, "tree map opened");
        Ok(Self {
            store: Slot::new(store),
            path: Some(path.to_path_buf()),
            _marker: PhantomData,
        })
    }

    pub fn in_memory() -> Result<Self, MapError> {
        let store = TreeStore::in_memory().map_err(MapError::open)?;
        Ok(Self {
            store: Slot::new(store),
            path: None,
            _marker: PhantomData,
        })
    }

    fn neighbor_key(&self, key: &K, which: Neighbor) -> Result<Option<K>, MapError> {
        let store = self.store.get()?;
        match store.neighbor(&encode_data(key)?, which)? {
            Some((raw, _)) => Ok(Some(decode_data(&raw)?)),
            None => Ok(None),
        }
    }

    fn neighbor_entry(&self, key: &K, which: Neighbor) -> Result<Option<(K, V)>, MapError> {
        let store = self.store.get()?;
        Self::decode_entry(store.neighbor(&encode_data(key)?, which)?)
    }

    fn decode_entry(entry: Option<RawEntry>) -> Result<Option<(K, V)>, MapError> {
        match entry {
            Some((k, v)) => Ok(Some((decode_data(&k)?, decode_data(&v)?))),
            None => Ok(None),
        }
    }

    fn decode_popped(entry: Option<(&[u8], &[u8])>) -> Result<Option<(K, V)>, MapError> {
        match entry {
            Some((k, v)) => Ok(Some((decode_data(k)?, decode_data(v)?))),
            None => Ok(None),
        }
    }

    fn scan(
        &self,
        from: Bound<&K>,
        to: Bound<&K>,
        descending: bool,
    ) -> Result<Cursor<'_, K, V>, MapError> {
        let store = self.store.get()?;
        let from = encode_bound(from)?;
        let to = encode_bound(to)?;
        if is_empty_range(&from, &to) {
            return Ok(Cursor::from_pairs(Vec::new()));
        }
        let pairs = store.range(borrow_bound(&from), borrow_bound(&to), descending)?;
        Ok(Cursor::from_pairs(pairs))
    }
}

impl<K: Pickle, V: Pickle> MapLike<K, V> for TreeMap<K, V> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            ordered: true,
            native_size: true,
            mutable: true,
            duplicates: false,
        }
    }

    fn get(&self, key: &K) -> Result<Option<V>, MapError> {
        let store = self.store.get()?;
        match store.get(&encode_data(key)?)? {
            Some(raw) => Ok(Some(decode_data(&raw)?)),
            None => Ok(None),
        }
    }

    /// The replaced value is decoded inside the write transaction, so a
    /// corrupt one aborts the put.
    fn put(&mut self, key: &K, value: &V) -> Result<Option<V>, MapError> {
        let store = self.store.get()?;
        store.insert_checked(&encode_data(key)?, &encode_data(value)?, |old| {
            old.map(decode_data).transpose()
        })
    }

    fn remove(&mut self, key: &K) -> Result<Option<V>, MapError> {
        let store = self.store.get()?;
        store.remove_checked(&encode_data(key)?, |old| old.map(decode_data).transpose())
    }

    fn size(&self) -> Result<u64, MapError> {
        Ok(self.store.get()?.len()?)
    }

    fn clear(&mut self) -> Result<(), MapError> {
        self.store.get()?.recreate()?;
        tracing::info!(backend = BACKEND, "map cleared");
        Ok(())
    }

    /// Entries in key order.
    fn entries(&self) -> Result<Cursor<'_, K, V>, MapError> {
        self.scan(Bound::Unbounded, Bound::Unbounded, false)
    }

    /// Every mutation commits its own transaction, so there is nothing to flush.
    fn flush(&mut self) -> Result<(), MapError> {
        self.store.get()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), MapError> {
        if let Some(mut store) = self.store.take() {
            if let Some(path) = &self.path {
                let compacted = store.compact()?;
                tracing::debug!(path = %path.display(), compacted, "tree map closed");
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    fn as_ordered(&mut self) -> Result<&mut dyn OrderedMapLike<K, V>, MapError> {
        Ok(self)
    }
}

impl<K: Pickle, V: Pickle> OrderedMapLike<K, V> for TreeMap<K, V> {
    fn lower_key(&self, key: &K) -> Result<Option<K>, MapError> {
        self.neighbor_key(key, Neighbor::Lower)
    }

    fn floor_key(&self, key: &K) -> Result<Option<K>, MapError> {
        self.neighbor_key(key, Neighbor::Floor)
    }

    fn ceiling_key(&self, key: &K) -> Result<Option<K>, MapError> {
        self.neighbor_key(key, Neighbor::Ceiling)
    }

    fn higher_key(&self, key: &K) -> Result<Option<K>, MapError> {
        self.neighbor_key(key, Neighbor::Higher)
    }

    fn lower_entry(&self, key: &K) -> Result<Option<(K, V)>, MapError> {
        self.neighbor_entry(key, Neighbor::Lower)
    }

    fn floor_entry(&self, key: &K) -> Result<Option<(K, V)>, MapError> {
        self.neighbor_entry(key, Neighbor::Floor)
    }

    fn ceiling_entry(&self, key: &K) -> Result<Option<(K, V)>, MapError> {
        self.neighbor_entry(key, Neighbor::Ceiling)
    }

    fn higher_entry(&self, key: &K) -> Result<Option<(K, V)>, MapError> {
        self.neighbor_entry(key, Neighbor::Higher)
    }

    fn first_entry(&self) -> Result<Option<(K, V)>, MapError> {
        Self::decode_entry(self.store.get()?.first()?)
    }

    fn last_entry(&self) -> Result<Option<(K, V)>, MapError> {
        Self::decode_entry(self.store.get()?.last()?)
    }

    fn poll_first_entry(&mut self) -> Result<Option<(K, V)>, MapError> {
        self.store.get()?.pop_first(Self::decode_popped)
    }

    fn poll_last_entry(&mut self) -> Result<Option<(K, V)>, MapError> {
        self.store.get()?.pop_last(Self::decode_popped)
    }

    fn range(&self, from: Bound<&K>, to: Bound<&K>) -> Result<Cursor<'_, K, V>, MapError> {
        self.scan(from, to, false)
    }

    fn range_desc(&self, from: Bound<&K>, to: Bound<&K>) -> Result<Cursor<'_, K, V>, MapError> {
        self.scan(from, to, true)
    }
}
