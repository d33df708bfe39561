//! Index Table - one SQLite B-tree per table name
//!
//! Keys are `hash_value \0 range_value` stored as BLOBs, so SQLite's memcmp
//! ordering turns `key >= start ORDER BY key` into a forward range scan.
//!
//! # Layout
//! ```text
//! <root>/labels/<table>/index.db
//! ```
//!
//! Durability is relaxed (`synchronous = OFF`); `flush` checkpoints the WAL.
//!
//! Writes go through a single connection. Scans and lookups borrow a
//! read-only connection from a small pool, so concurrent scans on one table
//! run in parallel and do not wait on writers.

use crate::index::entry::{Entry, Query, ReadBatch};
use crate::storage::error::{StorageError, StorageResult};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const DB_FILE: &str = "index.db";

/// Idle read connections kept per table
const MAX_IDLE_READERS: usize = 8;

/// An open index table
pub struct Table {
    name: String,
    conn: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    path: PathBuf,
}

impl Table {
    /// Create or open the table stored under `dir`
    pub fn open(name: &str, dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = OFF;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID",
            [],
        )?;

        Ok(Self {
            name: name.to_string(),
            conn: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(format!("table {}: {}", self.name, e)))
    }

    /// Run `f` on a pooled read-only connection
    fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let idle = self
            .readers
            .lock()
            .map_err(|e| StorageError::Lock(format!("table {}: {}", self.name, e)))?
            .pop();
        let conn = match idle {
            Some(conn) => conn,
            None => Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
        };

        let result = f(&conn);

        if let Ok(mut idle) = self.readers.lock() {
            if idle.len() < MAX_IDLE_READERS {
                idle.push(conn);
            }
        }
        result
    }

    /// Apply puts then deletes in one transaction
    pub fn write(&self, puts: &[Entry], deletes: &[Entry]) -> StorageResult<()> {
        if puts.is_empty() && deletes.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut put = tx.prepare_cached(
                "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
            )?;
            for e in puts {
                put.execute(params![e.key(), e.value])?;
            }

            let mut del = tx.prepare_cached("DELETE FROM entries WHERE key = ?1")?;
            for e in deletes {
                del.execute(params![e.key()])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    /// Raw key lookup
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached("SELECT value FROM entries WHERE key = ?1")?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    /// Raw single put, synced only by the next checkpoint
    pub fn set(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.prepare_cached("INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)")?
            .execute(params![key, value])?;
        Ok(())
    }

    /// Rows of `query`: seek to `hash \0 [prefix]`, stop once the key leaves
    /// the row (or the range-value prefix), skip rows failing `value_equal`.
    pub fn scan(&self, query: &Query) -> StorageResult<ReadBatch> {
        let row_prefix = query.row_prefix();
        let start = query.start_key();
        let check_start = !query.range_value_prefix.is_empty();

        let out = self.with_reader(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT key, value FROM entries WHERE key >= ?1 ORDER BY key")?;
            let mut rows = stmt.query(params![start])?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let key: Vec<u8> = row.get(0)?;
                if !key.starts_with(&row_prefix) {
                    break;
                }
                if check_start && !key.starts_with(&start) {
                    break;
                }
                let value: Vec<u8> = row.get(1)?;
                if !query.value_equal.is_empty() && value != query.value_equal {
                    continue;
                }
                out.push(Entry {
                    table_name: query.table_name.clone(),
                    hash_value: query.hash_value.clone(),
                    range_value: key[row_prefix.len()..].to_vec(),
                    value,
                });
            }
            Ok(out)
        })?;

        Ok(ReadBatch::new(out))
    }

    /// Checkpoint the WAL into the main database file
    pub fn flush(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Get count of entries in the table
    pub fn count(&self) -> u64 {
        let result: StorageResult<i64> = self.with_reader(|conn| {
            conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
                .map_err(StorageError::from)
        });
        result.unwrap_or(0) as u64
    }

    /// Close all connections, reporting close errors
    pub fn close(self) -> StorageResult<()> {
        let readers = self
            .readers
            .into_inner()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        for reader in readers {
            reader.close().map_err(|(_, e)| StorageError::Database(e))?;
        }
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        conn.close().map_err(|(_, e)| StorageError::Database(e))
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}
