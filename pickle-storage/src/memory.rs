//! Process-local engine behind the `memory` backend.
//!
//! Records sit in a `BTreeMap` ordered by their encoded bytes, so a DATA
//! prefix scan walks user entries in encoded-key order and never meets the
//! META size record a [`CountedMap`](crate::counted_map::CountedMap) keeps
//! beside them. Nothing survives the process.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StorageError;
use crate::traits::{BatchOp, BatchWriter, KvPairs, KvStore, Recreate};

type Records = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding `pairs`, for seeding a map with existing records.
    pub fn from_pairs(pairs: KvPairs) -> Self {
        Self {
            records: RwLock::new(pairs.into_iter().collect()),
        }
    }

    /// Records held, DATA and META alike.
    pub fn record_count(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>, StorageError> {
        self.records.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>, StorageError> {
        self.records.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.read()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.write()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.write()?.remove(key);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.read()?.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError> {
        let records = self.read()?;
        Ok(records
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn engine_name(&self) -> &'static str {
        "memory"
    }
}

impl BatchWriter for MemoryStore {
    /// Applied under one write lock, so readers see all of a batch or none.
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut records = self.records.write().map_err(|e| StorageError::BatchError {
            reason: e.to_string(),
        })?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    records.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    records.remove(&key);
                }
            }
        }
        Ok(())
    }
}

impl Recreate for MemoryStore {
    fn recreate(&mut self) -> Result<(), StorageError> {
        let records = self.records.get_mut().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        records.clear();
        Ok(())
    }
}
