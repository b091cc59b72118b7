use crate::error::StorageError;

/// Result type for scan operations: a list of key-value byte pairs.
pub type KvPairs = Vec<(Vec<u8>, Vec<u8>)>;

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Raw byte-level interface every mutable engine exposes.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;
    fn exists(&self, key: &[u8]) -> Result<bool, StorageError>;

    /// All pairs whose key starts with `prefix`, in the engine's natural order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError>;

    /// Make buffered writes durable. Engines that write through are no-ops.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Short engine name used in log lines and `Unsupported` errors.
    fn engine_name(&self) -> &'static str;
}

/// Atomic batch writer trait.
pub trait BatchWriter: KvStore {
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError>;
}

/// Engines whose whole keyspace can be dropped and recreated in one step.
pub trait Recreate: KvStore {
    fn recreate(&mut self) -> Result<(), StorageError>;
}
