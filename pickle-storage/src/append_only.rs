//! Build-once map over a [`table_file`](crate::table_file).
//!
//! A handle opened in [`OpenMode::Create`] only accepts writes and becomes
//! readable once [`close`](MapLike::close) has finalized the file. A handle
//! opened in [`OpenMode::Read`] only accepts reads. Duplicate keys are kept.
//!
//! Which occurrence [`get`](MapLike::get) returns for a duplicated key follows
//! the table's physical layout and is not part of the contract; use
//! [`get_all`](MultiMapLike::get_all) when every occurrence matters.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use pickle_codec::Pickle;

use crate::config::OpenMode;
use crate::contract::{
    decode_data, encode_data, Capabilities, Cursor, MapLike, MultiMapLike, Slot,
};
use crate::error::MapError;
use crate::table_file::{TableReader, TableSummary, TableWriter};

const BACKEND: &str = "append_only";

enum Phase {
    Building(TableWriter),
    Sealed(TableReader),
}

pub struct AppendOnlyMap<K, V> {
    path: PathBuf,
    phase: Slot<Phase>,
    summary: Option<TableSummary>,
    _marker: PhantomData<fn() -> (K, V)>,
}

fn violation(op: &'static str, mode: OpenMode) -> MapError {
    MapError::ModeViolation {
        op,
        mode: mode.to_string(),
    }
}

impl<K: Pickle, V: Pickle> AppendOnlyMap<K, V> {
    /// Open `path` in `mode`. Create truncates any existing file.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, MapError> {
        let phase = match mode {
            OpenMode::Create => Phase::Building(TableWriter::create(path).map_err(MapError::open)?),
            OpenMode::Read => Phase::Sealed(TableReader::open(path).map_err(MapError::open)?),
            OpenMode::ReadWrite => {
                return Err(MapError::Open {
                    reason: format!("{} backend cannot be opened in {} mode", BACKEND, mode),
                })
            }
        };
        tracing::info!(path = %path.display(), mode = %mode, "append-only table opened");
        Ok(Self {
            path: path.to_path_buf(),
            phase: Slot::new(phase),
            summary: None,
            _marker: PhantomData,
        })
    }

    pub fn create(path: &Path) -> Result<Self, MapError> {
        Self::open(path, OpenMode::Create)
    }

    pub fn open_read(path: &Path) -> Result<Self, MapError> {
        Self::open(path, OpenMode::Read)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode of an open handle.
    pub fn mode(&self) -> Result<OpenMode, MapError> {
        Ok(match self.phase.get()? {
            Phase::Building(_) => OpenMode::Create,
            Phase::Sealed(_) => OpenMode::Read,
        })
    }

    /// What `close` wrote, when this handle built the table.
    pub fn summary(&self) -> Option<&TableSummary> {
        self.summary.as_ref()
    }

    /// Append one record. Duplicate keys are stored as separate records.
    pub fn add(&mut self, key: &K, value: &V) -> Result<(), MapError> {
        let writer = self.writer("add")?;
        writer.add(&encode_data(key)?, &encode_data(value)?)?;
        Ok(())
    }

    fn writer(&mut self, op: &'static str) -> Result<&mut TableWriter, MapError> {
        match self.phase.get_mut()? {
            Phase::Building(writer) => Ok(writer),
            Phase::Sealed(_) => Err(violation(op, OpenMode::Read)),
        }
    }

    fn reader(&self, op: &'static str) -> Result<&TableReader, MapError> {
        match self.phase.get()? {
            Phase::Sealed(reader) => Ok(reader),
            Phase::Building(_) => Err(violation(op, OpenMode::Create)),
        }
    }
}

impl<K: Pickle, V: Pickle> MapLike<K, V> for AppendOnlyMap<K, V> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            duplicates: true,
            ..Capabilities::default()
        }
    }

    fn get(&self, key: &K) -> Result<Option<V>, MapError> {
        let reader = self.reader("get")?;
        match reader.find(&encode_data(key)?)? {
            Some(raw) => Ok(Some(decode_data(&raw)?)),
            None => Ok(None),
        }
    }

    fn contains_key(&self, key: &K) -> Result<bool, MapError> {
        let reader = self.reader("contains_key")?;
        Ok(reader.contains(&encode_data(key)?))
    }

    /// Same as [`add`](AppendOnlyMap::add). The table cannot tell whether
    /// the key was already present, so this always returns `None`.
    fn put(&mut self, key: &K, value: &V) -> Result<Option<V>, MapError> {
        let writer = self.writer("put")?;
        writer.add(&encode_data(key)?, &encode_data(value)?)?;
        Ok(None)
    }

    fn remove(&mut self, _key: &K) -> Result<Option<V>, MapError> {
        self.phase.get()?;
        Err(MapError::Unsupported {
            op: "remove",
            backend: BACKEND,
        })
    }

    /// Distinct keys, counted with a full deduplicating scan.
    fn size(&self) -> Result<u64, MapError> {
        let reader = self.reader("size")?;
        let mut seen = HashSet::new();
        for record in reader.iter()? {
            let (key, _) = record?;
            seen.insert(key);
        }
        Ok(seen.len() as u64)
    }

    fn clear(&mut self) -> Result<(), MapError> {
        self.phase.get()?;
        Err(MapError::Unsupported {
            op: "clear",
            backend: BACKEND,
        })
    }

    /// Every record, duplicates included, in insertion order.
    fn entries(&self) -> Result<Cursor<'_, K, V>, MapError> {
        let reader = self.reader("entries")?;
        let records = reader.iter()?.map(|r| r.map_err(MapError::from));
        Ok(Cursor::new(Box::new(records)))
    }

    fn flush(&mut self) -> Result<(), MapError> {
        if let Phase::Building(writer) = self.phase.get_mut()? {
            writer.flush()?;
        }
        Ok(())
    }

    /// Finalizes the table in create mode. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), MapError> {
        match self.phase.take() {
            Some(Phase::Building(writer)) => {
                let summary = writer.finish()?;
                tracing::info!(
                    path = %summary.path.display(),
                    records = summary.record_count,
                    bytes = summary.file_size,
                    "append-only table finalized"
                );
                self.summary = Some(summary);
            }
            Some(Phase::Sealed(_)) => {
                tracing::debug!(path = %self.path.display(), "append-only table closed");
            }
            None => {}
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.phase.is_closed()
    }

    fn as_multi(&self) -> Result<&dyn MultiMapLike<K, V>, MapError> {
        Ok(self)
    }
}

impl<K: Pickle, V: Pickle> MultiMapLike<K, V> for AppendOnlyMap<K, V> {
    fn get_all(&self, key: &K) -> Result<Vec<V>, MapError> {
        let reader = self.reader("get_all")?;
        reader
            .find_all(&encode_data(key)?)?
            .iter()
            .map(|raw| decode_data(raw))
            .collect()
    }

    fn size_with_duplicates(&self) -> Result<u64, MapError> {
        Ok(self.reader("size_with_duplicates")?.record_count())
    }
}

impl<K, V> Drop for AppendOnlyMap<K, V> {
    fn drop(&mut self) {
        if let Ok(Phase::Building(writer)) = self.phase.get() {
            tracing::warn!(
                path = %self.path.display(),
                records = writer.record_count(),
                "append-only table dropped before finalize; the file is not readable"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(path: &Path, pairs: &[(&str, i64)]) {
        let mut map = AppendOnlyMap::<String, i64>::create(path).unwrap();
        for (k, v) in pairs {
            map.add(&k.to_string(), v).unwrap();
        }
        map.close().unwrap();
    }

    #[test]
    fn test_create_rejects_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = AppendOnlyMap::<String, i64>::create(&dir.path().join("t.pkl")).unwrap();
        map.add(&"a".to_string(), &1).unwrap();

        let err = map.get(&"a".to_string()).unwrap_err();
        assert!(matches!(err, MapError::ModeViolation { op: "get", .. }));
        assert!(matches!(
            map.get_all(&"a".to_string()),
            Err(MapError::ModeViolation { .. })
        ));
        assert!(matches!(map.size(), Err(MapError::ModeViolation { .. })));
        map.close().unwrap();
    }

    #[test]
    fn test_read_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.pkl");
        build(&path, &[("a", 1)]);

        let mut map = AppendOnlyMap::<String, i64>::open_read(&path).unwrap();
        let err = map.add(&"b".to_string(), &2).unwrap_err();
        assert!(matches!(err, MapError::ModeViolation { op: "add", .. }));
        assert!(matches!(
            map.put(&"b".to_string(), &2),
            Err(MapError::ModeViolation { .. })
        ));
    }

    #[test]
    fn test_duplicates_retained() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.pkl");
        build(&path, &[("a", 1), ("a", 2), ("b", 3)]);

        let map = AppendOnlyMap::<String, i64>::open_read(&path).unwrap();
        assert_eq!(map.get_all(&"a".to_string()).unwrap(), vec![1, 2]);
        assert_eq!(map.get(&"b".to_string()).unwrap(), Some(3));
        assert_eq!(map.get(&"z".to_string()).unwrap(), None);
        assert_eq!(map.size().unwrap(), 2);
        assert_eq!(map.size_with_duplicates().unwrap(), 3);
        assert!(map.contains_key(&"a".to_string()).unwrap());
    }

    #[test]
    fn test_entries_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.pkl");
        build(&path, &[("z", 1), ("a", 2), ("m", 3)]);

        let map = AppendOnlyMap::<String, i64>::open_read(&path).unwrap();
        let keys: Vec<String> = map
            .entries()
            .unwrap()
            .map(|e| e.unwrap().0)
            .collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_remove_and_clear_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.pkl");
        build(&path, &[("a", 1)]);

        let mut map = AppendOnlyMap::<String, i64>::open_read(&path).unwrap();
        assert!(matches!(
            map.remove(&"a".to_string()),
            Err(MapError::Unsupported { op: "remove", .. })
        ));
        assert!(matches!(map.clear(), Err(MapError::Unsupported { .. })));
        assert!(matches!(map.as_ordered(), Err(MapError::Unsupported { .. })));
    }

    #[test]
    fn test_unfinalized_table_cannot_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.pkl");
        {
            let mut map = AppendOnlyMap::<String, i64>::create(&path).unwrap();
            map.add(&"a".to_string(), &1).unwrap();
            map.flush().unwrap();
        }
        assert!(matches!(
            AppendOnlyMap::<String, i64>::open_read(&path),
            Err(MapError::Open { .. })
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = AppendOnlyMap::<String, i64>::create(&dir.path().join("t.pkl")).unwrap();
        map.add(&"a".to_string(), &1).unwrap();
        map.close().unwrap();
        assert_eq!(map.summary().unwrap().record_count, 1);
        assert!(map.is_closed());
        map.close().unwrap();
        assert!(matches!(
            map.add(&"b".to_string(), &2),
            Err(MapError::ClosedHandle)
        ));
        assert!(matches!(map.mode(), Err(MapError::ClosedHandle)));
    }

    #[test]
    fn test_read_write_mode_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppendOnlyMap::<String, i64>::open(&dir.path().join("t.pkl"), OpenMode::ReadWrite);
        assert!(matches!(result, Err(MapError::Open { .. })));
    }
}
