//! Mutable map over an engine with no native key count.
//!
//! The live count is kept in a META record (see [`size_counter`]) and written
//! in the same batch as each `put`/`remove`, so a failed batch leaves neither
//! the data change nor the count change behind. `clear` recreates the
//! engine's keyspace instead of deleting entries one by one.
//!
//! [`size_counter`]: crate::size_counter

use std::collections::HashSet;
use std::marker::PhantomData;

use pickle_codec::{Pickle, RecordKind};

use crate::contract::{decode_data, encode_data, Capabilities, Cursor, MapLike, Slot};
use crate::error::MapError;
use crate::size_counter::{apply_delta, put_delta, read_size, remove_delta, size_key, size_op};
use crate::traits::{BatchOp, BatchWriter, Recreate};

pub struct CountedMap<S, K, V> {
    store: Slot<S>,
    backend: &'static str,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<S, K, V> CountedMap<S, K, V>
where
    S: BatchWriter + Recreate,
    K: Pickle,
    V: Pickle,
{
    /// Wrap an open engine. With `recreate` the existing keyspace is dropped
    /// first. A missing counter is initialised from a scan of the data.
    pub fn new(mut store: S, recreate: bool) -> Result<Self, MapError> {
        let backend = store.engine_name();
        if recreate {
            store.recreate().map_err(MapError::open)?;
            tracing::info!(backend, "existing data dropped at open");
        }
        let key = size_key()?;
        if store.get(&key).map_err(MapError::open)?.is_none() {
            let live = store
                .prefix_scan(&[RecordKind::Data.as_byte()])
                .map_err(MapError::open)?
                .len() as u64;
            store
                .write_batch(vec![size_op(live)?])
                .map_err(MapError::open)?;
            tracing::info!(backend, size = live, "size counter initialised");
        }
        tracing::debug!(backend, "counted map opened");
        Ok(Self {
            store: Slot::new(store),
            backend,
            _marker: PhantomData,
        })
    }

    fn stored_size(store: &S) -> Result<u64, MapError> {
        let raw = store.get(&size_key()?)?;
        read_size(raw.as_deref())
    }
}

impl<S, K, V> MapLike<K, V> for CountedMap<S, K, V>
where
    S: BatchWriter + Recreate,
    K: Pickle,
    V: Pickle,
{
    fn backend(&self) -> &'static str {
        self.backend
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            mutable: true,
            ..Capabilities::default()
        }
    }

    fn get(&self, key: &K) -> Result<Option<V>, MapError> {
        let store = self.store.get()?;
        match store.get(&encode_data(key)?)? {
            Some(raw) => Ok(Some(decode_data(&raw)?)),
            None => Ok(None),
        }
    }

    fn contains_key(&self, key: &K) -> Result<bool, MapError> {
        let store = self.store.get()?;
        Ok(store.exists(&encode_data(key)?)?)
    }

    fn put(&mut self, key: &K, value: &V) -> Result<Option<V>, MapError> {
        let store = self.store.get()?;
        let key = encode_data(key)?;
        let old = match store.get(&key)? {
            Some(raw) => Some(decode_data(&raw)?),
            None => None,
        };
        let size = apply_delta(Self::stored_size(store)?, put_delta(old.is_some()));
        store.write_batch(vec![
            BatchOp::Put {
                key,
                value: encode_data(value)?,
            },
            size_op(size)?,
        ])?;
        Ok(old)
    }

    fn remove(&mut self, key: &K) -> Result<Option<V>, MapError> {
        let store = self.store.get()?;
        let key = encode_data(key)?;
        let Some(raw) = store.get(&key)? else {
            return Ok(None);
        };
        let old = decode_data(&raw)?;
        let size = apply_delta(Self::stored_size(store)?, remove_delta(true));
        store.write_batch(vec![BatchOp::Delete { key }, size_op(size)?])?;
        Ok(Some(old))
    }

    /// One batch for every pair plus a single counter update.
    fn put_all(&mut self, entries: &[(K, V)]) -> Result<(), MapError> {
        let store = self.store.get()?;
        let mut size = Self::stored_size(store)?;
        let mut seen = HashSet::with_capacity(entries.len());
        let mut ops = Vec::with_capacity(entries.len() + 1);
        for (key, value) in entries {
            let key = encode_data(key)?;
            if seen.insert(key.clone()) {
                size = apply_delta(size, put_delta(store.exists(&key)?));
            }
            ops.push(BatchOp::Put {
                key,
                value: encode_data(value)?,
            });
        }
        ops.push(size_op(size)?);
        store.write_batch(ops)?;
        tracing::debug!(backend = self.backend, pairs = entries.len(), "batch stored");
        Ok(())
    }

    fn size(&self) -> Result<u64, MapError> {
        Self::stored_size(self.store.get()?)
    }

    fn clear(&mut self) -> Result<(), MapError> {
        let backend = self.backend;
        let store = self.store.get_mut()?;
        store.recreate()?;
        store.write_batch(vec![size_op(0)?])?;
        tracing::info!(backend, "map cleared");
        Ok(())
    }

    /// Entries in the engine's byte order of encoded keys.
    fn entries(&self) -> Result<Cursor<'_, K, V>, MapError> {
        let store = self.store.get()?;
        let pairs = store.prefix_scan(&[RecordKind::Data.as_byte()])?;
        Ok(Cursor::from_pairs(pairs))
    }

    fn flush(&mut self) -> Result<(), MapError> {
        self.store.get()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), MapError> {
        if let Some(store) = self.store.take() {
            store.flush()?;
            tracing::debug!(backend = self.backend, "counted map closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.store.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::sqlite::SqliteStore;
    use crate::error::StorageError;
    use crate::traits::{KvPairs, KvStore};

    /// Engine that serves reads from memory but refuses every batch.
    struct RejectingStore {
        inner: MemoryStore,
    }

    impl RejectingStore {
        /// Seeded with `"a" -> 1` and a matching counter.
        fn seeded() -> Self {
            let inner = MemoryStore::new();
            inner
                .write_batch(vec![
                    BatchOp::Put {
                        key: encode_data(&"a".to_string()).unwrap(),
                        value: encode_data(&1i64).unwrap(),
                    },
                    size_op(1).unwrap(),
                ])
                .unwrap();
            Self { inner }
        }
    }

    impl KvStore for RejectingStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key)
        }
        fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
            self.inner.put(key, value)
        }
        fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
            self.inner.delete(key)
        }
        fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
            self.inner.exists(key)
        }
        fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError> {
            self.inner.prefix_scan(prefix)
        }
        fn engine_name(&self) -> &'static str {
            "rejecting"
        }
    }

    impl BatchWriter for RejectingStore {
        fn write_batch(&self, _ops: Vec<BatchOp>) -> Result<(), StorageError> {
            Err(StorageError::BatchError {
                reason: "disk full".to_string(),
            })
        }
    }

    impl Recreate for RejectingStore {
        fn recreate(&mut self) -> Result<(), StorageError> {
            self.inner.recreate()
        }
    }

    fn memory_map() -> CountedMap<MemoryStore, String, i64> {
        CountedMap::new(MemoryStore::new(), false).unwrap()
    }

    #[test]
    fn test_put_get_remove() {
        let mut map = memory_map();
        assert_eq!(map.put(&"a".to_string(), &1).unwrap(), None);
        assert_eq!(map.put(&"a".to_string(), &2).unwrap(), Some(1));
        assert_eq!(map.get(&"a".to_string()).unwrap(), Some(2));
        assert_eq!(map.size().unwrap(), 1);

        assert_eq!(map.remove(&"a".to_string()).unwrap(), Some(2));
        assert_eq!(map.remove(&"a".to_string()).unwrap(), None);
        assert_eq!(map.size().unwrap(), 0);
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn test_failed_batch_leaves_data_and_counter_untouched() {
        let mut map: CountedMap<_, String, i64> =
            CountedMap::new(RejectingStore::seeded(), false).unwrap();
        assert_eq!(map.size().unwrap(), 1);

        assert!(matches!(
            map.put(&"b".to_string(), &2),
            Err(MapError::Backend(StorageError::BatchError { .. }))
        ));
        assert_eq!(map.get(&"b".to_string()).unwrap(), None);
        assert_eq!(map.size().unwrap(), 1);

        assert!(map.remove(&"a".to_string()).is_err());
        assert_eq!(map.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(map.size().unwrap(), 1);

        assert!(map
            .put_all(&[("c".to_string(), 3), ("d".to_string(), 4)])
            .is_err());
        assert_eq!(map.get(&"c".to_string()).unwrap(), None);
        assert_eq!(map.size().unwrap(), 1);
    }

    #[test]
    fn test_put_all_counts_each_new_key_once() {
        let mut map = memory_map();
        map.put(&"a".to_string(), &1).unwrap();
        map.put_all(&[
            ("a".to_string(), 10),
            ("b".to_string(), 2),
            ("b".to_string(), 20),
            ("c".to_string(), 3),
        ])
        .unwrap();
        assert_eq!(map.size().unwrap(), 3);
        assert_eq!(map.get(&"a".to_string()).unwrap(), Some(10));
        assert_eq!(map.get(&"b".to_string()).unwrap(), Some(20));

        let keys: Vec<String> = map.keys().unwrap().map(|k| k.unwrap()).collect();
        let values: Vec<i64> = map.values().unwrap().map(|v| v.unwrap()).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(values, vec![10, 20, 3]);
    }

    #[test]
    fn test_counter_is_meta_record() {
        let mut map = memory_map();
        map.put(&"size".to_string(), &99).unwrap();
        assert_eq!(map.size().unwrap(), 1);
        assert_eq!(map.get(&"size".to_string()).unwrap(), Some(99));
        let entries: Vec<(String, i64)> = map.entries().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries, vec![("size".to_string(), 99)]);
    }

    #[test]
    fn test_clear_resets_counter() {
        let mut map = memory_map();
        for i in 0..10 {
            map.put(&format!("k{}", i), &i).unwrap();
        }
        assert_eq!(map.size().unwrap(), 10);
        map.clear().unwrap();
        assert_eq!(map.size().unwrap(), 0);
        assert_eq!(map.entries().unwrap().count(), 0);
        map.put(&"again".to_string(), &1).unwrap();
        assert_eq!(map.size().unwrap(), 1);
    }

    #[test]
    fn test_counter_initialised_from_existing_data() {
        let store = MemoryStore::from_pairs(
            (0..3i64)
                .map(|i| (encode_data(&i.to_string()).unwrap(), encode_data(&i).unwrap()))
                .collect(),
        );
        let map: CountedMap<_, String, i64> = CountedMap::new(store, false).unwrap();
        assert_eq!(map.size().unwrap(), 3);
    }

    #[test]
    fn test_recreate_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let path = path.to_str().unwrap();
        {
            let mut map: CountedMap<_, String, i64> =
                CountedMap::new(SqliteStore::new(path, "pickle").unwrap(), false).unwrap();
            map.put(&"a".to_string(), &1).unwrap();
            map.close().unwrap();
        }
        let map: CountedMap<_, String, i64> =
            CountedMap::new(SqliteStore::new(path, "pickle").unwrap(), true).unwrap();
        assert_eq!(map.size().unwrap(), 0);
        assert_eq!(map.get(&"a".to_string()).unwrap(), None);
    }

    #[test]
    fn test_navigation_unsupported() {
        let mut map = memory_map();
        assert!(matches!(
            map.as_ordered(),
            Err(MapError::Unsupported {
                backend: "memory",
                ..
            })
        ));
        assert!(matches!(map.as_multi(), Err(MapError::Unsupported { .. })));
    }

    #[test]
    fn test_closed_handle() {
        let mut map = memory_map();
        map.close().unwrap();
        map.close().unwrap();
        assert!(map.is_closed());
        assert!(matches!(
            map.get(&"a".to_string()),
            Err(MapError::ClosedHandle)
        ));
        assert!(matches!(
            map.put(&"a".to_string(), &1),
            Err(MapError::ClosedHandle)
        ));
        assert!(matches!(map.size(), Err(MapError::ClosedHandle)));
        assert!(matches!(map.flush(), Err(MapError::ClosedHandle)));
    }
}
