//! Index client: lazily opened tables, batched writes, parallel queries
//!
//! ```text
//! BatchWrite:  WriteBatch → group by table → one transaction per table
//! QueryPages:  [Query] → shared worker permits → Table::scan → callback
//! Reload:      every N minutes, evict tables whose directory vanished
//! ```
//!
//! The table map is read-mostly and guarded by a `std::sync::RwLock`; each
//! table serializes access to its own connection.

use crate::config::IndexConfig;
use crate::index::entry::{Entry, Query, ReadBatch, WriteBatch};
use crate::index::table::Table;
use crate::storage::error::{StorageError, StorageResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};

/// Whether a missing table may be created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOperation {
    Read,
    Write,
}

/// Per-query result handler
pub type QueryPagesCallback = dyn Fn(&Query, ReadBatch) -> StorageResult<()> + Send + Sync;

struct ClientInner {
    root: PathBuf,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    query_permits: Arc<Semaphore>,
}

/// Embedded KV backend owning one database per table name
pub struct IndexClient {
    inner: Arc<ClientInner>,
    shutdown_timeout: Duration,
    stop_tx: watch::Sender<bool>,
    reload_task: Mutex<Option<JoinHandle<()>>>,
}

impl IndexClient {
    /// Open the client rooted at `<dir>/labels` and start the reload loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(dir: &Path, config: &IndexConfig) -> StorageResult<Self> {
        let root = dir.join("labels");
        ensure_directory(&root)?;

        let inner = Arc::new(ClientInner {
            root,
            tables: RwLock::new(HashMap::new()),
            query_permits: Arc::new(Semaphore::new(config.query_parallelism.max(1))),
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let reload_task = spawn_reload_loop(
            Arc::clone(&inner),
            Duration::from_secs(config.reload_interval_secs.max(1)),
            stop_rx,
        );

        Ok(Self {
            inner,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
            stop_tx,
            reload_task: Mutex::new(Some(reload_task)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Open table handle. Reads never create a table.
    pub fn get_db(&self, name: &str, op: DbOperation) -> StorageResult<Arc<Table>> {
        self.inner.get_db(name, op)
    }

    /// Names of currently open tables
    pub fn open_tables(&self) -> Vec<String> {
        match self.inner.tables.read() {
            Ok(tables) => {
                let mut names: Vec<String> = tables.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    /// Drop cached tables whose directory no longer exists
    pub fn reload(&self) {
        self.inner.reload();
    }

    pub fn new_write_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Apply a batch, grouped into one transaction per table
    pub async fn batch_write(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.batch_write(batch)).await?
    }

    /// Run `queries` and hand each result to `callback`.
    ///
    /// A single query runs directly. Otherwise queries share the client-wide
    /// worker permits; every query runs to completion and the last error
    /// observed is returned.
    pub async fn query_pages<F>(&self, queries: Vec<Query>, callback: F) -> StorageResult<()>
    where
        F: Fn(&Query, ReadBatch) -> StorageResult<()> + Send + Sync + 'static,
    {
        let callback: Arc<QueryPagesCallback> = Arc::new(callback);

        if queries.len() == 1 {
            let inner = Arc::clone(&self.inner);
            return tokio::task::spawn_blocking(move || {
                let query = &queries[0];
                inner.query(query, callback.as_ref())
            })
            .await?;
        }

        let mut set = JoinSet::new();
        for query in queries {
            let permit = Arc::clone(&self.inner.query_permits)
                .acquire_owned()
                .await
                .map_err(|e| StorageError::Task(e.to_string()))?;
            let inner = Arc::clone(&self.inner);
            let callback = Arc::clone(&callback);
            set.spawn_blocking(move || {
                let _permit = permit;
                inner.query(&query, callback.as_ref())
            });
        }

        let mut last_err = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(StorageError::from).and_then(|r| r);
            if let Err(e) = result {
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the reload loop, then flush and close every table concurrently.
    ///
    /// Flushes still running after the shutdown timeout are abandoned.
    pub async fn shutdown(&self) -> StorageResult<()> {
        let _ = self.stop_tx.send(true);
        let task = self
            .reload_task
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Index reload loop ended abnormally: {}", e);
            }
        }

        let tables: Vec<Arc<Table>> = {
            let mut map = self
                .inner
                .tables
                .write()
                .map_err(|e| StorageError::Lock(e.to_string()))?;
            map.drain().map(|(_, t)| t).collect()
        };

        let mut set = JoinSet::new();
        for table in tables {
            let wait = self.shutdown_timeout;
            set.spawn(async move {
                let name = table.name().to_string();
                let flushing = Arc::clone(&table);
                let flush = tokio::task::spawn_blocking(move || flushing.flush());
                match timeout(wait, flush).await {
                    Ok(Ok(Ok(()))) => tracing::debug!(table = %name, "Flushed"),
                    Ok(Ok(Err(e))) => tracing::error!(table = %name, "Flush failed: {}", e),
                    Ok(Err(e)) => tracing::error!(table = %name, "Flush task failed: {}", e),
                    Err(_) => tracing::warn!(table = %name, "Flush timed out"),
                }
                close_table(table);
            });
        }
        while set.join_next().await.is_some() {}

        Ok(())
    }
}

impl Drop for IndexClient {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

impl std::fmt::Debug for IndexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexClient")
            .field("root", &self.inner.root)
            .field("tables", &self.open_tables())
            .finish()
    }
}

impl ClientInner {
    fn get_db(&self, name: &str, op: DbOperation) -> StorageResult<Arc<Table>> {
        {
            let tables = self
                .tables
                .read()
                .map_err(|e| StorageError::Lock(e.to_string()))?;
            if let Some(table) = tables.get(name) {
                return Ok(Arc::clone(table));
            }
        }

        let dir = self.root.join(name);
        if op == DbOperation::Read {
            match std::fs::metadata(&dir) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::TableNotFound(name.to_string()))
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut tables = self
            .tables
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(Table::open(name, &dir)?);
        tracing::debug!(table = %name, "Opened index table");
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    fn batch_write(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut grouped: HashMap<String, (Vec<Entry>, Vec<Entry>)> = HashMap::new();
        for e in batch.puts {
            grouped.entry(e.table_name.clone()).or_default().0.push(e);
        }
        for e in batch.deletes {
            grouped.entry(e.table_name.clone()).or_default().1.push(e);
        }

        for (name, (puts, deletes)) in grouped {
            let table = self.get_db(&name, DbOperation::Write)?;
            table.write(&puts, &deletes)?;
        }
        Ok(())
    }

    fn query(&self, query: &Query, callback: &QueryPagesCallback) -> StorageResult<()> {
        let table = match self.get_db(&query.table_name, DbOperation::Read) {
            Ok(table) => table,
            Err(StorageError::TableNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let batch = table.scan(query)?;
        callback(query, batch)
    }

    fn reload(&self) {
        let removed: Vec<String> = match self.tables.read() {
            Ok(tables) => tables
                .keys()
                .filter(|name| !self.root.join(name.as_str()).exists())
                .cloned()
                .collect(),
            Err(_) => return,
        };

        if removed.is_empty() {
            return;
        }

        let evicted: Vec<Arc<Table>> = match self.tables.write() {
            Ok(mut tables) => removed.iter().filter_map(|n| tables.remove(n)).collect(),
            Err(_) => return,
        };
        for table in evicted {
            tracing::info!(table = %table.name(), "Evicted index table with missing directory");
            close_table(table);
        }
    }
}

fn spawn_reload_loop(
    inner: Arc<ClientInner>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => inner.reload(),
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Close when this is the last handle; otherwise the final drop closes it.
fn close_table(table: Arc<Table>) {
    if let Ok(table) = Arc::try_unwrap(table) {
        let name = table.name().to_string();
        if let Err(e) = table.close() {
            tracing::error!(table = %name, "Close failed: {}", e);
        }
    }
}

fn ensure_directory(dir: &Path) -> StorageResult<()> {
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("not a directory: {}", dir.display()),
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(dir)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const TEST_KEY: &[u8] = b"test-key";
    const TEST_VALUE: &[u8] = b"test-value";

    fn create_test_client(dir: &Path) -> IndexClient {
        IndexClient::new(dir, &IndexConfig::default()).unwrap()
    }

    fn setup_db(client: &IndexClient, name: &str) {
        let table = client.get_db(name, DbOperation::Write).unwrap();
        table.set(TEST_KEY, TEST_VALUE).unwrap();
    }

    fn entry(i: usize) -> Entry {
        Entry {
            table_name: "test".into(),
            hash_value: "test".into(),
            range_value: i.to_string().into_bytes(),
            value: i.to_string().into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_write_then_delete() {
        let dir = tempdir().unwrap();
        let client = create_test_client(dir.path());

        let mut batch = client.new_write_batch();
        for i in 0..10 {
            batch.add(entry(i));
        }
        client.batch_write(batch).await.unwrap();

        let table = client.get_db("test", DbOperation::Read).unwrap();
        assert_eq!(table.get(&entry(2).key()).unwrap(), Some(b"2".to_vec()));

        let mut batch = client.new_write_batch();
        batch.delete(entry(2));
        client.batch_write(batch).await.unwrap();
        assert_eq!(table.get(&entry(2).key()).unwrap(), None);
        assert_eq!(table.count(), 9);

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_evicts_removed_tables() {
        let dir = tempdir().unwrap();
        let client = create_test_client(dir.path());

        setup_db(&client, "test1");
        setup_db(&client, "test2");

        client.reload();
        assert_eq!(client.open_tables(), vec!["test1", "test2"]);

        std::fs::remove_dir_all(dir.path().join("labels").join("test1")).unwrap();

        // Still cached until the next reload
        let dropped = client.get_db("test1", DbOperation::Read).unwrap();
        assert_eq!(dropped.get(TEST_KEY).unwrap(), Some(TEST_VALUE.to_vec()));
        drop(dropped);

        client.reload();
        assert_eq!(client.open_tables(), vec!["test2"]);
        let err = client.get_db("test1", DbOperation::Read).unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_db() {
        let dir = tempdir().unwrap();
        let client = create_test_client(dir.path());
        setup_db(&client, "test1");

        assert!(client.get_db("test1", DbOperation::Read).is_ok());

        let err = client.get_db("unexistent-db", DbOperation::Read).unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));
        assert!(client.get_db("unexistent-db", DbOperation::Write).is_ok());

        client.shutdown().await.unwrap();
        drop(client);

        // A fresh client reads a table it never wrote
        let client = create_test_client(dir.path());
        let table = client.get_db("test1", DbOperation::Read).unwrap();
        assert_eq!(table.get(TEST_KEY).unwrap(), Some(TEST_VALUE.to_vec()));
        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_pages_parallel() {
        let dir = tempdir().unwrap();
        let client = create_test_client(dir.path());

        let mut batch = client.new_write_batch();
        for table in ["a", "b", "c"] {
            for i in 0..5 {
                batch.add(Entry {
                    table_name: table.into(),
                    hash_value: "row".into(),
                    range_value: format!("{}\x00", i).into_bytes(),
                    value: vec![1],
                });
            }
        }
        client.batch_write(batch).await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let queries: Vec<Query> = ["a", "b", "c", "missing"]
            .iter()
            .map(|t| Query {
                table_name: t.to_string(),
                hash_value: "row".into(),
                ..Default::default()
            })
            .collect();
        client
            .query_pages(queries, move |_, batch| {
                counter.fetch_add(batch.len(), Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 15);

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_pages_single_missing_table() {
        let dir = tempdir().unwrap();
        let client = create_test_client(dir.path());
        let query = Query {
            table_name: "nope".into(),
            hash_value: "row".into(),
            ..Default::default()
        };
        client
            .query_pages(vec![query], |_, _| panic!("no rows expected"))
            .await
            .unwrap();
        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_pages_reports_callback_error() {
        let dir = tempdir().unwrap();
        let client = create_test_client(dir.path());
        setup_db(&client, "a");
        setup_db(&client, "b");

        let queries = vec![
            Query {
                table_name: "a".into(),
                hash_value: "x".into(),
                ..Default::default()
            },
            Query {
                table_name: "b".into(),
                hash_value: "x".into(),
                ..Default::default()
            },
        ];
        let result = client
            .query_pages(queries, |q, _| {
                if q.table_name == "b" {
                    Err(StorageError::Schema("boom".into()))
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(matches!(result, Err(StorageError::Schema(_))));
        client.shutdown().await.unwrap();
    }
}
