//! Relational map of printable columns.
//!
//! Keys and values are stored as `base64(optionally-gzip(record))` text in
//! `pickle_key` (unique index) and `pickle_value` (plain index) columns, so
//! the table stays readable from ordinary SQL tooling. Size is a native
//! `COUNT(*)`.
//!
//! With `auto_commit` off the handle keeps a transaction open; `flush`
//! commits it and starts the next one.

use std::marker::PhantomData;

use rusqlite::{params, Connection, OptionalExtension};

use pickle_codec::{decode_expecting, encode_text, text_to_record, Pickle, RecordKind};

use crate::contract::{Capabilities, Cursor, MapLike, Slot};
use crate::error::{MapError, StorageError};
use crate::sqlite::{check_identifier, open_connection};

const BACKEND: &str = "relational";

pub struct SqlMap<K, V> {
    conn: Slot<Connection>,
    table: String,
    auto_commit: bool,
    compress: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

fn create_table(conn: &Connection, table: &str) -> Result<(), StorageError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} (pickle_key TEXT, pickle_value TEXT);
         CREATE UNIQUE INDEX IF NOT EXISTS {t}_key_index ON {t} (pickle_key);
         CREATE INDEX IF NOT EXISTS {t}_value_index ON {t} (pickle_value);",
        t = table
    ))?;
    Ok(())
}

/// Run `f` atomically: inside the handle's open transaction if there is one,
/// otherwise in a fresh transaction.
fn atomically<T, E: From<StorageError>>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, E>,
) -> Result<T, E> {
    if conn.is_autocommit() {
        let tx = conn.unchecked_transaction().map_err(StorageError::from)?;
        let out = f(&*tx)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(out)
    } else {
        f(conn)
    }
}

impl<K: Pickle, V: Pickle> SqlMap<K, V> {
    pub fn open(
        path: &str,
        table: &str,
        auto_commit: bool,
        compress: bool,
        recreate: bool,
    ) -> Result<Self, MapError> {
        check_identifier(table).map_err(MapError::open)?;
        let conn = open_connection(path).map_err(MapError::open)?;
        atomically(&conn, |c| -> Result<(), StorageError> {
            if recreate {
                c.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
            }
            create_table(c, table)
        })
        .map_err(MapError::open)?;
        if !auto_commit {
            conn.execute_batch("BEGIN").map_err(MapError::open)?;
        }
        tracing::info!(path, table, auto_commit, compress, "relational map opened");
        Ok(Self {
            conn: Slot::new(conn),
            table: table.to_string(),
            auto_commit,
            compress,
            _marker: PhantomData,
        })
    }

    fn to_text<T: Pickle>(&self, value: &T) -> Result<String, MapError> {
        Ok(encode_text(RecordKind::Data, value, self.compress)?)
    }

    fn from_text<T: Pickle>(&self, text: &str) -> Result<T, MapError> {
        let record = text_to_record(text, self.compress)?;
        Ok(decode_expecting(RecordKind::Data, &record)?)
    }

    /// Decoded value stored under `key_text`, if any.
    fn previous(&self, conn: &Connection, key_text: &str) -> Result<Option<V>, MapError> {
        match self.lookup(conn, key_text)? {
            Some(text) => Ok(Some(self.from_text(&text)?)),
            None => Ok(None),
        }
    }

    fn lookup(&self, conn: &Connection, key_text: &str) -> Result<Option<String>, StorageError> {
        let value = conn
            .query_row(
                &format!("SELECT pickle_value FROM {} WHERE pickle_key = ?1", self.table),
                params![key_text],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Whether any key currently maps to `value`. Uses the value index.
    pub fn contains_value(&self, value: &V) -> Result<bool, MapError> {
        let conn = self.conn.get()?;
        let found: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE pickle_value = ?1 LIMIT 1", self.table),
                params![self.to_text(value)?],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(found.is_some())
    }

    /// Commit the open transaction, if any. A no-op with auto-commit.
    pub fn commit(&mut self) -> Result<(), MapError> {
        let conn = self.conn.get()?;
        if !self.auto_commit {
            conn.execute_batch("COMMIT; BEGIN")
                .map_err(StorageError::from)?;
            tracing::debug!(table = %self.table, "relational map committed");
        }
        Ok(())
    }
}

impl<K: Pickle, V: Pickle> MapLike<K, V> for SqlMap<K, V> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_size: true,
            mutable: true,
            ..Capabilities::default()
        }
    }

    fn get(&self, key: &K) -> Result<Option<V>, MapError> {
        let conn = self.conn.get()?;
        match self.lookup(conn, &self.to_text(key)?)? {
            Some(text) => Ok(Some(self.from_text(&text)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &K, value: &V) -> Result<Option<V>, MapError> {
        let conn = self.conn.get()?;
        let key_text = self.to_text(key)?;
        let value_text = self.to_text(value)?;
        atomically(conn, |c| -> Result<Option<V>, MapError> {
            let old = self.previous(c, &key_text)?;
            c.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (pickle_key, pickle_value) VALUES (?1, ?2)",
                    self.table
                ),
                params![key_text, value_text],
            )
            .map_err(StorageError::from)?;
            Ok(old)
        })
    }

    fn remove(&mut self, key: &K) -> Result<Option<V>, MapError> {
        let conn = self.conn.get()?;
        let key_text = self.to_text(key)?;
        atomically(conn, |c| -> Result<Option<V>, MapError> {
            let old = self.previous(c, &key_text)?;
            if old.is_some() {
                c.execute(
                    &format!("DELETE FROM {} WHERE pickle_key = ?1", self.table),
                    params![key_text],
                )
                .map_err(StorageError::from)?;
            }
            Ok(old)
        })
    }

    fn size(&self) -> Result<u64, MapError> {
        let conn = self.conn.get()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(StorageError::from)?;
        let size = u64::try_from(count).map_err(|_| StorageError::ReadError {
            reason: format!("row count of {} is negative: {}", self.table, count),
        })?;
        Ok(size)
    }

    /// Drop and recreate the table, inside the open transaction if any.
    fn clear(&mut self) -> Result<(), MapError> {
        let conn = self.conn.get()?;
        atomically(conn, |c| -> Result<(), StorageError> {
            c.execute(&format!("DROP TABLE IF EXISTS {}", self.table), [])?;
            create_table(c, &self.table)
        })?;
        tracing::info!(table = %self.table, "map cleared");
        Ok(())
    }

    /// Entries in table order.
    fn entries(&self) -> Result<Cursor<'_, K, V>, MapError> {
        let conn = self.conn.get()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT pickle_key, pickle_value FROM {}",
                self.table
            ))
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(StorageError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;
        let compress = self.compress;
        let records = rows
            .into_iter()
            .map(move |(k, v)| -> Result<(Vec<u8>, Vec<u8>), MapError> {
                Ok((text_to_record(&k, compress)?, text_to_record(&v, compress)?))
            });
        Ok(Cursor::new(Box::new(records)))
    }

    fn flush(&mut self) -> Result<(), MapError> {
        self.commit()
    }

    fn close(&mut self) -> Result<(), MapError> {
        if let Some(conn) = self.conn.take() {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT").map_err(StorageError::from)?;
            }
            tracing::debug!(table = %self.table, "relational map closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}
