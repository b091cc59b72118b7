//! Ordered B-tree engine on redb.
//!
//! Keys are stored as encoded records, but the tree orders them with
//! [`compare_records`], i.e. by decoded value rather than by raw bytes. That
//! comparator is what the navigable operations are defined against.

use std::cmp::Ordering;
use std::ops::Bound;
use std::path::Path;

use redb::{
    Database, Key, ReadableTable, ReadableTableMetadata, TableDefinition, TypeName, Value,
};

use pickle_codec::compare_records;

use crate::error::StorageError;
use crate::traits::KvPairs;

/// redb key type for encoded pickle records.
#[derive(Debug)]
pub struct PickledKey;

impl Value for PickledKey {
    type SelfType<'a> = &'a [u8]
    where
        Self: 'a;
    type AsBytes<'a> = &'a [u8]
    where
        Self: 'a;

    fn fixed_width() -> Option<usize> {
        None
    }

    fn from_bytes<'a>(data: &'a [u8]) -> Self::SelfType<'a>
    where
        Self: 'a,
    {
        data
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Self::AsBytes<'a>
    where
        Self: 'b,
    {
        value
    }

    fn type_name() -> TypeName {
        TypeName::new("pickle::record")
    }
}

impl Key for PickledKey {
    fn compare(data1: &[u8], data2: &[u8]) -> Ordering {
        compare_records(data1, data2)
    }
}

const ENTRIES: TableDefinition<PickledKey, &[u8]> = TableDefinition::new("pickle_entries");

/// Which neighbour of a target key to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    /// greatest key strictly less than the target
    Lower,
    /// greatest key less than or equal to the target
    Floor,
    /// least key greater than or equal to the target
    Ceiling,
    /// least key strictly greater than the target
    Higher,
}

/// A redb database holding one ordered table of pickled pairs.
pub struct TreeStore {
    db: Database,
}

impl TreeStore {
    /// Open or create a database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Create a database that lives only in memory.
    pub fn in_memory() -> Result<Self, StorageError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, StorageError> {
        let txn = db.begin_write()?;
        txn.open_table(ENTRIES)?;
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    /// Insert in its own committed transaction, returning the replaced value.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.insert_checked(key, value, |old| Ok::<_, StorageError>(old.map(<[u8]>::to_vec)))
    }

    /// Insert in its own transaction, handing the replaced value to `check`
    /// before commit. An error from `check` aborts the transaction.
    pub fn insert_checked<T, E: From<StorageError>>(
        &self,
        key: &[u8],
        value: &[u8],
        check: impl FnOnce(Option<&[u8]>) -> Result<T, E>,
    ) -> Result<T, E> {
        let txn = self.db.begin_write().map_err(StorageError::from)?;
        let out = {
            let mut table = txn.open_table(ENTRIES).map_err(StorageError::from)?;
            let old = table.insert(key, value).map_err(StorageError::from)?;
            let out = check(old.as_ref().map(|v| v.value()))?;
            out
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(out)
    }

    /// Remove in its own committed transaction, returning the removed value.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.remove_checked(key, |old| Ok::<_, StorageError>(old.map(<[u8]>::to_vec)))
    }

    /// Remove in its own transaction; `check` sees the removed value before
    /// commit and can abort it.
    pub fn remove_checked<T, E: From<StorageError>>(
        &self,
        key: &[u8],
        check: impl FnOnce(Option<&[u8]>) -> Result<T, E>,
    ) -> Result<T, E> {
        let txn = self.db.begin_write().map_err(StorageError::from)?;
        let out = {
            let mut table = txn.open_table(ENTRIES).map_err(StorageError::from)?;
            let old = table.remove(key).map_err(StorageError::from)?;
            let out = check(old.as_ref().map(|v| v.value()))?;
            out
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(out)
    }

    /// Number of keys, maintained natively by the B-tree.
    pub fn len(&self) -> Result<u64, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    pub fn neighbor(
        &self,
        target: &[u8],
        which: Neighbor,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = match which {
            Neighbor::Lower => (Bound::Unbounded, Bound::Excluded(target)),
            Neighbor::Floor => (Bound::Unbounded, Bound::Included(target)),
            Neighbor::Ceiling => (Bound::Included(target), Bound::Unbounded),
            Neighbor::Higher => (Bound::Excluded(target), Bound::Unbounded),
        };
        let mut range = table.range::<&[u8]>(bounds)?;
        let item = match which {
            Neighbor::Lower | Neighbor::Floor => range.next_back(),
            Neighbor::Ceiling | Neighbor::Higher => range.next(),
        };
        match item {
            Some(entry) => {
                let (k, v) = entry?;
                Ok(Some((k.value().to_vec(), v.value().to_vec())))
            }
            None => Ok(None),
        }
    }

    pub fn first(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let first = table
            .first()?
            .map(|(k, v)| (k.value().to_vec(), v.value().to_vec()));
        Ok(first)
    }

    pub fn last(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let last = table
            .last()?
            .map(|(k, v)| (k.value().to_vec(), v.value().to_vec()));
        Ok(last)
    }

    /// Remove the smallest entry in one write transaction. `check` sees it
    /// before commit and can abort the removal.
    pub fn pop_first<T, E: From<StorageError>>(
        &self,
        check: impl FnOnce(Option<(&[u8], &[u8])>) -> Result<T, E>,
    ) -> Result<T, E> {
        let txn = self.db.begin_write().map_err(StorageError::from)?;
        let out = {
            let mut table = txn.open_table(ENTRIES).map_err(StorageError::from)?;
            let popped = table.pop_first().map_err(StorageError::from)?;
            let out = check(popped.as_ref().map(|(k, v)| (k.value(), v.value())))?;
            out
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(out)
    }

    /// Remove the largest entry in one write transaction, checked like
    /// [`pop_first`](Self::pop_first).
    pub fn pop_last<T, E: From<StorageError>>(
        &self,
        check: impl FnOnce(Option<(&[u8], &[u8])>) -> Result<T, E>,
    ) -> Result<T, E> {
        let txn = self.db.begin_write().map_err(StorageError::from)?;
        let out = {
            let mut table = txn.open_table(ENTRIES).map_err(StorageError::from)?;
            let popped = table.pop_last().map_err(StorageError::from)?;
            let out = check(popped.as_ref().map(|(k, v)| (k.value(), v.value())))?;
            out
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(out)
    }

    /// All entries between the bounds, in comparator order or its reverse.
    pub fn range(
        &self,
        from: Bound<&[u8]>,
        to: Bound<&[u8]>,
        descending: bool,
    ) -> Result<KvPairs, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let range = table.range::<&[u8]>((from, to))?;
        let pairs = if descending {
            range
                .rev()
                .map(|e| e.map(|(k, v)| (k.value().to_vec(), v.value().to_vec())))
                .collect::<Result<KvPairs, _>>()?
        } else {
            range
                .map(|e| e.map(|(k, v)| (k.value().to_vec(), v.value().to_vec())))
                .collect::<Result<KvPairs, _>>()?
        };
        Ok(pairs)
    }

    /// Drop the table and recreate it empty in a single transaction.
    pub fn recreate(&self) -> Result<(), StorageError> {
        let txn = self.db.begin_write()?;
        txn.delete_table(ENTRIES)?;
        txn.open_table(ENTRIES)?;
        txn.commit()?;
        Ok(())
    }

    /// Reclaim free pages. Returns whether anything was compacted.
    pub fn compact(&mut self) -> Result<bool, StorageError> {
        Ok(self.db.compact()?)
    }
}
