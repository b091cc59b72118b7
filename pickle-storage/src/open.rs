use std::path::Path;

use pickle_codec::Pickle;

use crate::append_only::AppendOnlyMap;
use crate::config::{BackendKind, StoreConfig};
use crate::contract::MapLike;
use crate::counted_map::CountedMap;
use crate::error::MapError;
use crate::memory::MemoryStore;
use crate::rocksdb::RocksDbStore;
use crate::row_map::RowMap;
use crate::sql_map::SqlMap;
use crate::sqlite::SqliteStore;
use crate::tree_map::TreeMap;

/// Location value that keeps a SQLite or tree backend in memory.
pub const IN_MEMORY: &str = ":memory:";

/// Open a map handle on whichever backend `config` names.
///
/// Mode and table name are validated first; any engine failure while opening
/// is reported as [`MapError::Open`].
pub fn open_map<K, V>(config: &StoreConfig) -> Result<Box<dyn MapLike<K, V>>, MapError>
where
    K: Pickle + 'static,
    V: Pickle + 'static,
{
    config.validate()?;
    let location = config.location.as_str();
    let map: Box<dyn MapLike<K, V>> = match config.backend {
        BackendKind::Memory => Box::new(CountedMap::<_, K, V>::new(
            MemoryStore::new(),
            config.recreate,
        )?),
        BackendKind::Sqlite => {
            let store = SqliteStore::new(location, &config.table).map_err(MapError::open)?;
            Box::new(CountedMap::<_, K, V>::new(store, config.recreate)?)
        }
        BackendKind::Rocksdb => {
            let store = RocksDbStore::new(location, &config.table).map_err(MapError::open)?;
            Box::new(CountedMap::<_, K, V>::new(store, config.recreate)?)
        }
        BackendKind::AppendOnly => {
            Box::new(AppendOnlyMap::<K, V>::open(Path::new(location), config.mode)?)
        }
        BackendKind::Tree if location == IN_MEMORY => Box::new(TreeMap::<K, V>::in_memory()?),
        BackendKind::Tree => Box::new(TreeMap::<K, V>::open(
            Path::new(location),
            config.recreate,
        )?),
        BackendKind::Rows => Box::new(RowMap::<K, V>::open(
            location,
            &config.table,
            config.auto_flush,
            config.recreate,
        )?),
        BackendKind::Relational => Box::new(SqlMap::<K, V>::open(
            location,
            &config.table,
            config.auto_flush,
            config.compress,
            config.recreate,
        )?),
    };
    tracing::debug!(backend = %config.backend, location, mode = %config.mode, "map handle ready");
    Ok(map)
}
