use thiserror::Error;

use pickle_codec::CodecError;

/// Errors raised by a wrapped storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Read error: {reason}")]
    ReadError { reason: String },

    #[error("Write error: {reason}")]
    WriteError { reason: String },

    #[error("SQLite error: {reason}")]
    SqliteError { reason: String },

    #[error("RocksDB error: {reason}")]
    RocksDbError { reason: String },

    #[error("redb error: {reason}")]
    RedbError { reason: String },

    #[error("Table file error: {reason}")]
    TableFileError { reason: String },

    #[error("Batch error: {reason}")]
    BatchError { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::SqliteError {
            reason: err.to_string(),
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDbError {
            reason: err.into_string(),
        }
    }
}

macro_rules! from_redb {
    ($($t:ty),*) => {$(
        impl From<$t> for StorageError {
            fn from(err: $t) -> Self {
                StorageError::RedbError {
                    reason: err.to_string(),
                }
            }
        }
    )*};
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    redb::CompactionError
);

/// Errors surfaced by every map handle, whatever the backend.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("open failed: {reason}")]
    Open { reason: String },

    #[error("operation `{op}` not allowed in {mode} mode")]
    ModeViolation { op: &'static str, mode: String },

    #[error("operation `{op}` is not supported by the {backend} backend")]
    Unsupported {
        op: &'static str,
        backend: &'static str,
    },

    #[error("corrupt record: {0}")]
    CorruptRecord(#[from] CodecError),

    #[error("map handle is closed")]
    ClosedHandle,

    #[error("backend failure: {0}")]
    Backend(#[from] StorageError),
}

impl MapError {
    /// Wrap an engine failure that happened while opening a handle.
    pub fn open(err: impl std::fmt::Display) -> Self {
        MapError::Open {
            reason: err.to_string(),
        }
    }
}
