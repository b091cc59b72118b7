//! Typed key/value maps over interchangeable storage engines.
//!
//! Every handle implements [`MapLike`](contract::MapLike). Handles on the
//! redb B-tree also navigate by key through
//! [`OrderedMapLike`](contract::OrderedMapLike), and append-only tables keep
//! duplicate keys behind [`MultiMapLike`](contract::MultiMapLike). Keys and
//! values are encoded with `pickle_codec`.
//!
//! Engines live behind the [`KvStore`](traits::KvStore) trait (memory,
//! SQLite, RocksDB) or their own types ([`table_file`], [`tree_store`]).
//! [`open_map`](open::open_map) builds a handle from a
//! [`StoreConfig`](config::StoreConfig).

pub mod append_only;
pub mod config;
pub mod contract;
pub mod counted_map;
pub mod error;
pub mod memory;
pub mod open;
pub mod rocksdb;
pub mod row_map;
pub mod size_counter;
pub mod sql_map;
pub mod sqlite;
pub mod table_file;
pub mod traits;
pub mod tree_map;
pub mod tree_store;

pub use append_only::AppendOnlyMap;
pub use config::{BackendKind, OpenMode, StoreConfig};
pub use contract::{Capabilities, Cursor, Keys, MapLike, MultiMapLike, OrderedMapLike, Values};
pub use counted_map::CountedMap;
pub use error::{MapError, StorageError};
pub use open::{open_map, IN_MEMORY};
pub use row_map::RowMap;
pub use sql_map::SqlMap;
pub use tree_map::TreeMap;
