use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteBatchWithTransaction, DEFAULT_COLUMN_FAMILY_NAME,
};

use crate::error::StorageError;
use crate::traits::{BatchOp, BatchWriter, KvPairs, KvStore, Recreate};

/// RocksDB-backed key-value store.
///
/// Pairs live in one named column family so the whole map can be dropped and
/// recreated without touching the rest of the database.
pub struct RocksDbStore {
    db: DBWithThreadMode<MultiThreaded>,
    cf_name: String,
}

impl RocksDbStore {
    /// Open (or create) a RocksDB store at `path`, keeping pairs in `cf_name`.
    pub fn new(path: &str, cf_name: &str) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = [DEFAULT_COLUMN_FAMILY_NAME, cf_name]
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db =
            DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            cf_name: cf_name.to_string(),
        })
    }

    fn cf(&self) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle(&self.cf_name)
            .ok_or_else(|| StorageError::RocksDbError {
                reason: format!("Column family '{}' not found", self.cf_name),
            })
    }
}

impl KvStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf()?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf()?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf()?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        let cf = self.cf()?;
        Ok(self.db.get_pinned_cf(&cf, key)?.is_some())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError> {
        let cf = self.cf()?;
        let iter = self.db.prefix_iterator_cf(&cf, prefix);
        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StorageError::ReadError {
                reason: e.to_string(),
            })?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn flush(&self) -> Result<(), StorageError> {
        let cf = self.cf()?;
        self.db.flush_cf(&cf)?;
        Ok(())
    }

    fn engine_name(&self) -> &'static str {
        "rocksdb"
    }
}

impl BatchWriter for RocksDbStore {
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let cf = self.cf()?;
        let mut batch = WriteBatchWithTransaction::<false>::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    batch.put_cf(&cf, &key, &value);
                }
                BatchOp::Delete { key } => {
                    batch.delete_cf(&cf, &key);
                }
            }
        }
        self.db.write(batch)?;
        Ok(())
    }
}

impl Recreate for RocksDbStore {
    fn recreate(&mut self) -> Result<(), StorageError> {
        self.db.drop_cf(&self.cf_name)?;
        self.db.create_cf(&self.cf_name, &Options::default())?;
        Ok(())
    }
}
