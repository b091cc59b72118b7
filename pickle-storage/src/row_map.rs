//! Wide-table map on SQLite with a side counter row.
//!
//! Each entry is one row keyed by its encoded DATA record. A reserved row
//! keyed by the META `"size"` record carries the live count in its `tally`
//! column; counter mutations add to it the way a summing combiner would.
//!
//! Mutations go through a [`RowWriter`]. Each `put`/`remove` enqueues the
//! data mutation and its counter delta together. With auto-flush the buffer
//! is committed after every call; otherwise the caller decides when to
//! [`flush`](MapLike::flush). Reads on the same handle see buffered writes.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use rusqlite::{params, Connection, OptionalExtension};

use pickle_codec::{Pickle, RecordKind};

use crate::contract::{decode_data, encode_data, Capabilities, Cursor, MapLike, Slot};
use crate::error::{MapError, StorageError};
use crate::size_counter::{apply_delta, put_delta, remove_delta, size_key};
use crate::sqlite::{check_identifier, open_connection};

const BACKEND: &str = "rows";

/// One buffered change to the wide table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMutation {
    Put { row: Vec<u8>, cell: Vec<u8> },
    Delete { row: Vec<u8> },
    Count { delta: i64 },
}

/// Buffer of pending row mutations, committed in one SQLite transaction.
#[derive(Debug)]
pub struct RowWriter {
    table: String,
    counter_row: Vec<u8>,
    pending: Vec<RowMutation>,
    auto_flush: bool,
}

impl RowWriter {
    fn new(table: &str, counter_row: Vec<u8>, auto_flush: bool) -> Self {
        Self {
            table: table.to_string(),
            counter_row,
            pending: Vec::new(),
            auto_flush,
        }
    }

    pub fn pending(&self) -> &[RowMutation] {
        &self.pending
    }

    pub fn auto_flush(&self) -> bool {
        self.auto_flush
    }

    /// Queue mutations that belong together, flushing afterwards in
    /// auto-flush mode. If that flush fails the buffer is restored to what
    /// it held before the call.
    pub fn enqueue(
        &mut self,
        conn: &mut Connection,
        mutations: impl IntoIterator<Item = RowMutation>,
    ) -> Result<(), StorageError> {
        let mark = self.pending.len();
        self.pending.extend(mutations);
        if self.auto_flush {
            if let Err(err) = self.flush(conn) {
                self.pending.truncate(mark);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Commit every pending mutation in one transaction.
    pub fn flush(&mut self, conn: &mut Connection) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let tx = conn.transaction()?;
        for mutation in &self.pending {
            match mutation {
                RowMutation::Put { row, cell } => {
                    tx.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {} (row_key, cell) VALUES (?1, ?2)",
                            self.table
                        ),
                        params![row, cell],
                    )?;
                }
                RowMutation::Delete { row } => {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE row_key = ?1", self.table),
                        params![row],
                    )?;
                }
                RowMutation::Count { delta } => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {} (row_key, tally) VALUES (?1, ?2) \
                             ON CONFLICT(row_key) DO UPDATE SET tally = tally + excluded.tally",
                            self.table
                        ),
                        params![self.counter_row, delta],
                    )?;
                }
            }
        }
        tx.commit()?;
        tracing::debug!(
            table = %self.table,
            mutations = self.pending.len(),
            "row writer flushed"
        );
        self.pending.clear();
        Ok(())
    }

    fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Latest buffered state of `row`: `Some(Some(cell))` for a pending put,
    /// `Some(None)` for a pending delete, `None` if the row is untouched.
    fn overlay(&self, row: &[u8]) -> Option<Option<&[u8]>> {
        self.pending.iter().rev().find_map(|m| match m {
            RowMutation::Put { row: r, cell } if r == row => Some(Some(cell.as_slice())),
            RowMutation::Delete { row: r } if r == row => Some(None),
            _ => None,
        })
    }

    fn pending_delta(&self) -> i64 {
        self.pending
            .iter()
            .map(|m| match m {
                RowMutation::Count { delta } => *delta,
                _ => 0,
            })
            .sum()
    }
}

struct RowState {
    conn: Connection,
    writer: RowWriter,
}

pub struct RowMap<K, V> {
    state: Slot<RowState>,
    table: String,
    _marker: PhantomData<fn() -> (K, V)>,
}

fn create_table(conn: &Connection, table: &str) -> Result<(), StorageError> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} \
             (row_key BLOB PRIMARY KEY, cell BLOB, tally INTEGER NOT NULL DEFAULT 0)",
            table
        ),
        [],
    )?;
    Ok(())
}

/// Drop and recreate the table with a zero counter row, atomically.
fn recreate_table(conn: &mut Connection, table: &str, counter_row: &[u8]) -> Result<(), StorageError> {
    let tx = conn.transaction()?;
    tx.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
    create_table(&tx, table)?;
    tx.execute(
        &format!("INSERT INTO {} (row_key, tally) VALUES (?1, 0)", table),
        params![counter_row],
    )?;
    tx.commit()?;
    Ok(())
}

fn data_bounds() -> ([u8; 1], [u8; 1]) {
    let data = RecordKind::Data.as_byte();
    ([data], [data + 1])
}

impl<K: Pickle, V: Pickle> RowMap<K, V> {
    /// Open the wide table `table` in the SQLite database at `path`.
    ///
    /// `recreate` drops any existing table first. A table without a counter
    /// row gets one initialised from a count of its data rows.
    pub fn open(path: &str, table: &str, auto_flush: bool, recreate: bool) -> Result<Self, MapError> {
        check_identifier(table).map_err(MapError::open)?;
        let mut conn = open_connection(path).map_err(MapError::open)?;
        let counter_row = size_key()?;
        if recreate {
            recreate_table(&mut conn, table, &counter_row).map_err(MapError::open)?;
            tracing::info!(table, "existing rows dropped at open");
        } else {
            create_table(&conn, table).map_err(MapError::open)?;
            Self::init_counter(&conn, table, &counter_row).map_err(MapError::open)?;
        }
        tracing::info!(path, table, auto_flush, "row map opened");
        Ok(Self {
            state: Slot::new(RowState {
                conn,
                writer: RowWriter::new(table, counter_row, auto_flush),
            }),
            table: table.to_string(),
            _marker: PhantomData,
        })
    }

    fn init_counter(conn: &Connection, table: &str, counter_row: &[u8]) -> Result<(), StorageError> {
        let existing: Option<i64> = conn
            .query_row(
                &format!("SELECT tally FROM {} WHERE row_key = ?1", table),
                params![counter_row],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_none() {
            let (lo, hi) = data_bounds();
            let live: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE row_key >= ?1 AND row_key < ?2",
                    table
                ),
                params![&lo[..], &hi[..]],
                |row| row.get(0),
            )?;
            conn.execute(
                &format!("INSERT INTO {} (row_key, tally) VALUES (?1, ?2)", table),
                params![counter_row, live],
            )?;
            tracing::info!(table, size = live, "size counter initialised");
        }
        Ok(())
    }

    /// Buffered mutations not yet committed.
    pub fn pending(&self) -> Result<usize, MapError> {
        Ok(self.state.get()?.writer.pending().len())
    }

    fn stored_cell(&self, row: &[u8]) -> Result<Option<Vec<u8>>, MapError> {
        let state = self.state.get()?;
        if let Some(buffered) = state.writer.overlay(row) {
            return Ok(buffered.map(<[u8]>::to_vec));
        }
        let cell: Option<Option<Vec<u8>>> = state
            .conn
            .query_row(
                &format!("SELECT cell FROM {} WHERE row_key = ?1", self.table),
                params![row],
                |r| r.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(cell.flatten())
    }
}

impl<K: Pickle, V: Pickle> MapLike<K, V> for RowMap<K, V> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            mutable: true,
            ..Capabilities::default()
        }
    }

    fn get(&self, key: &K) -> Result<Option<V>, MapError> {
        match self.stored_cell(&encode_data(key)?)? {
            Some(raw) => Ok(Some(decode_data(&raw)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &K, value: &V) -> Result<Option<V>, MapError> {
        let row = encode_data(key)?;
        let old = match self.stored_cell(&row)? {
            Some(raw) => Some(decode_data(&raw)?),
            None => None,
        };
        let cell = encode_data(value)?;
        let state = self.state.get_mut()?;
        state.writer.enqueue(
            &mut state.conn,
            [
                RowMutation::Put { row, cell },
                RowMutation::Count {
                    delta: put_delta(old.is_some()),
                },
            ],
        )?;
        Ok(old)
    }

    fn remove(&mut self, key: &K) -> Result<Option<V>, MapError> {
        let row = encode_data(key)?;
        let Some(raw) = self.stored_cell(&row)? else {
            return Ok(None);
        };
        let old = decode_data(&raw)?;
        let state = self.state.get_mut()?;
        state.writer.enqueue(
            &mut state.conn,
            [
                RowMutation::Delete { row },
                RowMutation::Count {
                    delta: remove_delta(true),
                },
            ],
        )?;
        Ok(Some(old))
    }

    /// Committed tally plus buffered deltas.
    fn size(&self) -> Result<u64, MapError> {
        let state = self.state.get()?;
        let tally: Option<i64> = state
            .conn
            .query_row(
                &format!("SELECT tally FROM {} WHERE row_key = ?1", self.table),
                params![state.writer.counter_row],
                |r| r.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        let tally = tally.unwrap_or(0);
        let committed = u64::try_from(tally).map_err(|_| StorageError::ReadError {
            reason: format!("size counter in {} is negative: {}", self.table, tally),
        })?;
        Ok(apply_delta(committed, state.writer.pending_delta()))
    }

    /// Drops buffered mutations, then recreates the table.
    fn clear(&mut self) -> Result<(), MapError> {
        let table = self.table.clone();
        let state = self.state.get_mut()?;
        let dropped = state.writer.discard();
        recreate_table(&mut state.conn, &table, &state.writer.counter_row)?;
        tracing::info!(table = %table, discarded = dropped, "map cleared");
        Ok(())
    }

    /// Entries in encoded-key byte order, buffered writes applied.
    fn entries(&self) -> Result<Cursor<'_, K, V>, MapError> {
        let state = self.state.get()?;
        let (lo, hi) = data_bounds();
        let mut rows = BTreeMap::new();
        {
            let mut stmt = state
                .conn
                .prepare(&format!(
                    "SELECT row_key, cell FROM {} WHERE row_key >= ?1 AND row_key < ?2 ORDER BY row_key",
                    self.table
                ))
                .map_err(StorageError::from)?;
            let mut query = stmt
                .query(params![&lo[..], &hi[..]])
                .map_err(StorageError::from)?;
            while let Some(r) = query.next().map_err(StorageError::from)? {
                let row: Vec<u8> = r.get(0).map_err(StorageError::from)?;
                let cell: Vec<u8> = r.get(1).map_err(StorageError::from)?;
                rows.insert(row, cell);
            }
        }
        for mutation in state.writer.pending() {
            match mutation {
                RowMutation::Put { row, cell } => {
                    rows.insert(row.clone(), cell.clone());
                }
                RowMutation::Delete { row } => {
                    rows.remove(row);
                }
                RowMutation::Count { .. } => {}
            }
        }
        Ok(Cursor::from_pairs(rows.into_iter().collect()))
    }

    fn flush(&mut self) -> Result<(), MapError> {
        let state = self.state.get_mut()?;
        state.writer.flush(&mut state.conn)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), MapError> {
        if let Some(mut state) = self.state.take() {
            state.writer.flush(&mut state.conn)?;
            tracing::debug!(table = %self.table, "row map closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

impl<K, V> Drop for RowMap<K, V> {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get() {
            let pending = state.writer.pending().len();
            if pending > 0 {
                tracing::warn!(
                    table = %self.table,
                    pending,
                    "row map dropped with unflushed mutations"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(auto_flush: bool) -> RowMap<String, i64> {
        RowMap::open(":memory:", "rows", auto_flush, false).unwrap()
    }

    #[test]
    fn test_auto_flush_leaves_nothing_pending() {
        let mut map = open(true);
        map.put(&"a".to_string(), &1).unwrap();
        map.put(&"b".to_string(), &2).unwrap();
        assert_eq!(map.pending().unwrap(), 0);
        assert_eq!(map.size().unwrap(), 2);
    }

    #[test]
    fn test_manual_flush_reads_own_writes() {
        let mut map = open(false);
        map.put(&"a".to_string(), &1).unwrap();
        map.put(&"a".to_string(), &2).unwrap();
        map.put(&"b".to_string(), &3).unwrap();
        map.remove(&"b".to_string()).unwrap();

        assert_eq!(map.pending().unwrap(), 8);
        assert_eq!(map.get(&"a".to_string()).unwrap(), Some(2));
        assert_eq!(map.get(&"b".to_string()).unwrap(), None);
        assert_eq!(map.size().unwrap(), 1);
        let entries: Vec<(String, i64)> = map.entries().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries, vec![("a".to_string(), 2)]);

        map.flush().unwrap();
        assert_eq!(map.pending().unwrap(), 0);
        assert_eq!(map.size().unwrap(), 1);
        assert_eq!(map.get(&"a".to_string()).unwrap(), Some(2));
    }

    #[test]
    fn test_writer_keeps_data_and_counter_together() {
        let mut map = open(false);
        map.put(&"a".to_string(), &1).unwrap();
        let state = map.state.get().unwrap();
        assert_eq!(
            state.writer.pending()[1],
            RowMutation::Count { delta: 1 }
        );
        assert!(matches!(state.writer.pending()[0], RowMutation::Put { .. }));
    }

    #[test]
    fn test_clear_discards_buffer_and_rows() {
        let mut map = open(false);
        map.put(&"a".to_string(), &1).unwrap();
        map.flush().unwrap();
        map.put(&"b".to_string(), &2).unwrap();
        map.clear().unwrap();
        assert_eq!(map.pending().unwrap(), 0);
        assert_eq!(map.size().unwrap(), 0);
        assert_eq!(map.entries().unwrap().count(), 0);
    }

    #[test]
    fn test_reopen_keeps_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.db");
        let path = path.to_str().unwrap();
        {
            let mut map = RowMap::<String, i64>::open(path, "rows", false, false).unwrap();
            for i in 0..5 {
                map.put(&format!("k{}", i), &i).unwrap();
            }
            map.close().unwrap();
        }
        {
            let map = RowMap::<String, i64>::open(path, "rows", true, false).unwrap();
            assert_eq!(map.size().unwrap(), 5);
        }
        let map = RowMap::<String, i64>::open(path, "rows", true, true).unwrap();
        assert_eq!(map.size().unwrap(), 0);
    }

    #[test]
    fn test_counter_row_hidden_from_entries() {
        let mut map = open(true);
        map.put(&"size".to_string(), &10).unwrap();
        let entries: Vec<(String, i64)> = map.entries().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries, vec![("size".to_string(), 10)]);
        assert_eq!(map.size().unwrap(), 1);
    }

    fn fail_fast_on_lock(map: &RowMap<String, i64>) {
        let state = map.state.get().unwrap();
        state.conn.busy_timeout(std::time::Duration::ZERO).unwrap();
    }

    #[test]
    fn test_failed_auto_flush_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.db");
        let path = path.to_str().unwrap();
        {
            let mut map = RowMap::<String, i64>::open(path, "rows", true, false).unwrap();
            fail_fast_on_lock(&map);
            let blocker = Connection::open(path).unwrap();
            blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

            assert!(matches!(
                map.put(&"a".to_string(), &1),
                Err(MapError::Backend(_))
            ));
            assert_eq!(map.pending().unwrap(), 0);
            assert_eq!(map.get(&"a".to_string()).unwrap(), None);
            assert_eq!(map.size().unwrap(), 0);

            blocker.execute_batch("COMMIT").unwrap();
            map.put(&"b".to_string(), &2).unwrap();
            map.close().unwrap();
        }
        let map = RowMap::<String, i64>::open(path, "rows", true, false).unwrap();
        assert_eq!(map.get(&"a".to_string()).unwrap(), None);
        assert_eq!(map.get(&"b".to_string()).unwrap(), Some(2));
        assert_eq!(map.size().unwrap(), 1);
    }

    #[test]
    fn test_failed_auto_flush_keeps_earlier_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.db");
        let path = path.to_str().unwrap();
        let mut map = RowMap::<String, i64>::open(path, "rows", true, false).unwrap();
        map.put(&"a".to_string(), &1).unwrap();
        fail_fast_on_lock(&map);

        let blocker = Connection::open(path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();
        assert!(map.remove(&"a".to_string()).is_err());
        assert_eq!(map.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(map.size().unwrap(), 1);
        blocker.execute_batch("ROLLBACK").unwrap();
    }

    #[test]
    fn test_negative_counter_is_an_error() {
        let map = open(true);
        let state = map.state.get().unwrap();
        state
            .conn
            .execute(
                "UPDATE rows SET tally = -3 WHERE row_key = ?1",
                params![state.writer.counter_row],
            )
            .unwrap();
        assert!(matches!(
            map.size(),
            Err(MapError::Backend(StorageError::ReadError { .. }))
        ));
    }

    #[test]
    fn test_invalid_table_name() {
        assert!(matches!(
            RowMap::<String, i64>::open(":memory:", "bad name", true, false),
            Err(MapError::Open { .. })
        ));
    }
}
