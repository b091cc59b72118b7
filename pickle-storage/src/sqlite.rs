use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::StorageError;
use crate::traits::{BatchOp, BatchWriter, KvPairs, KvStore, Recreate};

/// Reject table names that could not be spliced into SQL verbatim.
pub(crate) fn check_identifier(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StorageError::SqliteError {
            reason: format!("invalid table name '{}'", name),
        })
    }
}

/// Open a connection with the pragmas every SQLite-backed map uses.
pub(crate) fn open_connection(path: &str) -> Result<Connection, StorageError> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// SQLite-backed key-value store.
/// Uses a single table with BLOB key and BLOB value columns.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path, keeping pairs in `table`.
    /// Use `:memory:` for an in-memory database (useful for tests).
    pub fn new(path: &str, table: &str) -> Result<Self, StorageError> {
        check_identifier(table)?;
        let conn = open_connection(path)?;
        create_table(&conn, table)?;
        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }
}

fn create_table(conn: &Connection, table: &str) -> Result<(), StorageError> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (key BLOB PRIMARY KEY, value BLOB NOT NULL)",
            table
        ),
        [],
    )?;
    Ok(())
}

impl KvStore for SqliteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT value FROM {} WHERE key = ?1", self.table))?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => {
                let value: Vec<u8> = row.get(0)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                self.table
            ),
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", self.table),
            params![key],
        )?;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT 1 FROM {} WHERE key = ?1", self.table))?;
        let mut rows = stmt.query(params![key])?;
        Ok(rows.next()?.is_some())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;

        // Compute the upper bound for the prefix range.
        // If all bytes overflow we just scan to the end.
        let upper_bound = increment_prefix(prefix);

        let mut results = Vec::new();
        match upper_bound {
            Some(ref ub) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT key, value FROM {} WHERE key >= ?1 AND key < ?2 ORDER BY key",
                    self.table
                ))?;
                let mut rows = stmt.query(params![prefix, ub])?;
                while let Some(row) = rows.next()? {
                    results.push((row.get(0)?, row.get(1)?));
                }
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT key, value FROM {} WHERE key >= ?1 ORDER BY key",
                    self.table
                ))?;
                let mut rows = stmt.query(params![prefix])?;
                while let Some(row) = rows.next()? {
                    let k: Vec<u8> = row.get(0)?;
                    if !k.starts_with(prefix) {
                        break;
                    }
                    results.push((k, row.get(1)?));
                }
            }
        }

        Ok(results)
    }

    fn engine_name(&self) -> &'static str {
        "sqlite"
    }
}

impl BatchWriter for SqliteStore {
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::BatchError {
            reason: e.to_string(),
        })?;
        let tx = conn.unchecked_transaction()?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    tx.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                            self.table
                        ),
                        params![key, value],
                    )?;
                }
                BatchOp::Delete { key } => {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE key = ?1", self.table),
                        params![key],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl Recreate for SqliteStore {
    fn recreate(&mut self) -> Result<(), StorageError> {
        let conn = self.conn.get_mut().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", self.table), [])?;
        create_table(&tx, &self.table)?;
        tx.commit()?;
        Ok(())
    }
}

/// Increment a byte prefix to compute an exclusive upper bound.
/// Returns None if the prefix is all 0xFF bytes (no upper bound).
pub(crate) fn increment_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut result = prefix.to_vec();
    for i in (0..result.len()).rev() {
        if result[i] < 0xFF {
            result[i] += 1;
            result.truncate(i + 1);
            return Some(result);
        }
    }
    None
}
