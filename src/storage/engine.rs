//! Store façade
//!
//! Composes the content store and the label index behind the three
//! surfaces collaborators use:
//!
//! - **Ingester**: open a write transaction, stream bytes, commit with labels
//! - **Provider**: resolve a ref to a sized random-access reader
//! - **Manager**: query by time range + matchers, edit labels, delete
//!
//! ```text
//! Writer::commit ─→ ContentWriter::commit ─→ LabelWriter::put("_label", info)
//! Manager::query ─→ schema for range.from ─→ LabelIndexStore::get_blobs
//! ```

use crate::blob::{check_user_id, BlobOptions, Digest, Info, Labels, Ref, TimeRange};
use crate::config::{Config, SchemaConfig};
use crate::content::{BlobReader, ContentStore, ContentWriter, Status};
use crate::index::{create_schema, schema_for_time, BlobStoreSchema, IndexClient};
use crate::label::{LabelIndexStore, LabelWriter, Matcher, METRIC_LABEL};
use crate::storage::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

/// Obtain write transactions
#[async_trait]
pub trait Ingester: Send + Sync {
    async fn writer(&self, opts: &BlobOptions) -> StorageResult<Box<dyn Writer>>;
}

/// Resolve refs to readable bytes
#[async_trait]
pub trait Provider: Send + Sync {
    async fn reader_at(&self, r: &Ref) -> StorageResult<BlobReader>;
}

/// Query and label management
#[async_trait]
pub trait Manager: Send + Sync {
    async fn query(
        &self,
        range: TimeRange,
        user_id: &str,
        matchers: &[Matcher],
    ) -> StorageResult<Vec<Info>>;

    async fn info(&self, r: &Ref) -> StorageResult<Info>;

    async fn put_label(&self, r: &Ref, name: &str, value: &str) -> StorageResult<()>;

    async fn delete_label(&self, r: &Ref, name: &str, value: &str) -> StorageResult<()>;

    /// Logical delete: the blob stops resolving, its bytes stay on disk
    async fn delete(&self, r: &Ref) -> StorageResult<()>;
}

/// An open ingest transaction
#[async_trait]
pub trait Writer: Write + Send {
    /// Verify, move into place and index the blob's labels.
    ///
    /// `size == 0` skips the size check.
    async fn commit(
        &mut self,
        size: u64,
        expected: Option<&Digest>,
        opts: &BlobOptions,
    ) -> StorageResult<()>;

    fn info(&self) -> Info;

    fn status(&self) -> StorageResult<Status>;

    fn truncate(&mut self, size: u64) -> StorageResult<()>;

    fn close(&mut self) -> StorageResult<()>;
}

/// Blob store rooted at one directory
#[derive(Debug)]
pub struct Store {
    config: Config,
    content: ContentStore,
    client: Arc<IndexClient>,
}

impl Store {
    /// Open (or create) the store described by `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(config: Config) -> StorageResult<Self> {
        config
            .validate()
            .map_err(|e| StorageError::Schema(e.to_string()))?;

        let root = config.storage.root.clone();
        let content = ContentStore::new(&root)?;
        let client = Arc::new(IndexClient::new(&root, &config.index)?);

        tracing::info!(root = ?root, periods = config.schema.configs.len(), "Opened blob store");

        Ok(Self {
            config,
            content,
            client,
        })
    }

    /// Open with default settings under `root`
    pub async fn open_dir(root: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open(Config::with_root(root.as_ref())).await
    }

    pub fn root(&self) -> &Path {
        self.content.root()
    }

    /// Refs only, without resolving labels
    pub async fn query_refs(
        &self,
        range: TimeRange,
        user_id: &str,
        matchers: &[Matcher],
    ) -> StorageResult<Vec<Ref>> {
        check_user_id(user_id)?;
        self.label_reader(range.from)?
            .get_blob_refs(range, user_id, METRIC_LABEL, matchers)
            .await
    }

    /// Logical delete followed by removal of the blob's bytes
    pub async fn purge(&self, r: &Ref) -> StorageResult<()> {
        self.delete(r).await?;
        self.content.delete(r)
    }

    /// Stop background work and flush the index
    pub async fn shutdown(&self) -> StorageResult<()> {
        tracing::info!("Shutting down blob store...");
        self.client.shutdown().await?;
        tracing::info!("Blob store shutdown complete");
        Ok(())
    }

    fn label_writer(&self, t: i64) -> StorageResult<LabelWriter> {
        let schema = schema_at(&self.config.schema, t)?;
        Ok(LabelWriter::new(Arc::clone(&self.client), schema))
    }

    fn label_reader(&self, t: i64) -> StorageResult<LabelIndexStore> {
        let schema = schema_at(&self.config.schema, t)?;
        Ok(LabelIndexStore::new(Arc::clone(&self.client), schema))
    }
}

fn schema_at(cfg: &SchemaConfig, t: i64) -> StorageResult<BlobStoreSchema> {
    create_schema(schema_for_time(cfg, t)?)
}

fn check_mutable(name: &str) -> StorageResult<()> {
    if name.starts_with('_') {
        return Err(StorageError::LabelImmutable(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl Ingester for Store {
    async fn writer(&self, opts: &BlobOptions) -> StorageResult<Box<dyn Writer>> {
        let content = self.content.writer(opts)?;
        Ok(Box::new(StoreWriter {
            content,
            client: Arc::clone(&self.client),
            schema: self.config.schema.clone(),
        }))
    }
}

#[async_trait]
impl Provider for Store {
    async fn reader_at(&self, r: &Ref) -> StorageResult<BlobReader> {
        self.content.reader_at(r)
    }
}

#[async_trait]
impl Manager for Store {
    async fn query(
        &self,
        range: TimeRange,
        user_id: &str,
        matchers: &[Matcher],
    ) -> StorageResult<Vec<Info>> {
        check_user_id(user_id)?;
        self.label_reader(range.from)?
            .get_blobs(range, user_id, METRIC_LABEL, matchers)
            .await
    }

    async fn info(&self, r: &Ref) -> StorageResult<Info> {
        check_user_id(&r.user_id)?;
        let infos = self
            .label_reader(r.time_range.from)?
            .refs_to_blobs(std::slice::from_ref(r), METRIC_LABEL)
            .await?;
        infos
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound("blob not found".to_string()))
    }

    async fn put_label(&self, r: &Ref, name: &str, value: &str) -> StorageResult<()> {
        check_mutable(name)?;
        check_user_id(&r.user_id)?;
        self.label_writer(r.time_range.from)?
            .put_labels(r, METRIC_LABEL, &Labels::new().with(name, value))
            .await
    }

    async fn delete_label(&self, r: &Ref, name: &str, value: &str) -> StorageResult<()> {
        check_mutable(name)?;
        check_user_id(&r.user_id)?;
        self.label_writer(r.time_range.from)?
            .del_labels(r, METRIC_LABEL, &Labels::new().with(name, value))
            .await
    }

    async fn delete(&self, r: &Ref) -> StorageResult<()> {
        check_user_id(&r.user_id)?;
        self.label_writer(r.time_range.from)?
            .del_one(METRIC_LABEL, r)
            .await
    }
}

/// Content writer that indexes labels once the bytes are committed
struct StoreWriter {
    content: ContentWriter,
    client: Arc<IndexClient>,
    schema: SchemaConfig,
}

#[async_trait]
impl Writer for StoreWriter {
    async fn commit(
        &mut self,
        size: u64,
        expected: Option<&Digest>,
        opts: &BlobOptions,
    ) -> StorageResult<()> {
        self.content.commit(size, expected, opts)?;

        let info = self.content.info();
        let schema = schema_at(&self.schema, info.blob_ref.time_range.from)?;
        LabelWriter::new(Arc::clone(&self.client), schema)
            .put(METRIC_LABEL, std::slice::from_ref(&info))
            .await?;

        tracing::debug!(key = %info.external_key(), labels = %info.labels, "Committed blob");
        Ok(())
    }

    fn info(&self) -> Info {
        self.content.info()
    }

    fn status(&self) -> StorageResult<Status> {
        self.content.status()
    }

    fn truncate(&mut self, size: u64) -> StorageResult<()> {
        self.content.truncate(size)
    }

    fn close(&mut self) -> StorageResult<()> {
        self.content.close()
    }
}

impl Write for StoreWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.content.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.content.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::date;
    use tempfile::tempdir;

    async fn create_test_store(dir: &Path) -> Store {
        Store::open_dir(dir).await.unwrap()
    }

    async fn put(store: &Store, content: &[u8], opts: BlobOptions) -> Info {
        let mut w = store.writer(&opts).await.unwrap();
        w.write_all(content).unwrap();
        w.commit(content.len() as u64, None, &BlobOptions::new())
            .await
            .unwrap();
        w.info()
    }

    #[tokio::test]
    async fn test_system_labels_are_immutable() {
        let dir = tempdir().unwrap();
        let store = create_test_store(dir.path()).await;
        let info = put(
            &store,
            b"1234",
            BlobOptions::new().at(date(2022, 5, 15)).label("_mediaType", "text/plain"),
        )
        .await;

        let err = store
            .put_label(&info.blob_ref, "_mediaType", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LabelImmutable(_)));
        let err = store
            .delete_label(&info.blob_ref, "_mediaType", "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LabelImmutable(_)));

        let found = store.info(&info.blob_ref).await.unwrap();
        assert!(found.labels.has_value("_mediaType", "text/plain"));
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_time_before_first_period_fails() {
        let dir = tempdir().unwrap();
        let store = create_test_store(dir.path()).await;
        let range = TimeRange::at(date(2020, 1, 1));
        let err = store.query(range, "0", &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::Schema(_)));
    }

    #[tokio::test]
    async fn test_user_id_with_delimiter_is_rejected() {
        let dir = tempdir().unwrap();
        let store = create_test_store(dir.path()).await;
        let t = date(2022, 5, 15);
        let is_invalid_user =
            |e: StorageError| matches!(e, StorageError::InvalidRef { field: "user", .. });

        let err = store
            .writer(&BlobOptions::new().at(t).user_id("cam:1").label("k", "v"))
            .await
            .err()
            .unwrap();
        assert!(is_invalid_user(err));
        assert!(!store.root().join("blobs").exists());

        let mut w = store
            .writer(&BlobOptions::new().at(t).user_id("cam").label("k", "v"))
            .await
            .unwrap();
        w.write_all(b"x").unwrap();
        let err = w
            .commit(1, None, &BlobOptions::new().user_id("cam/1"))
            .await
            .unwrap_err();
        assert!(is_invalid_user(err));
        assert!(!store.root().join("blobs").exists());

        let err = store.query(TimeRange::at(t), "cam:1", &[]).await.unwrap_err();
        assert!(is_invalid_user(err));

        let mut r = Info::from_bytes(b"x", &BlobOptions::new().at(t)).blob_ref;
        r.user_id = "cam:1".to_string();
        assert!(is_invalid_user(store.info(&r).await.unwrap_err()));
        assert!(is_invalid_user(store.put_label(&r, "k", "v").await.unwrap_err()));
        assert!(is_invalid_user(store.delete_label(&r, "k", "v").await.unwrap_err()));
        assert!(is_invalid_user(store.delete(&r).await.unwrap_err()));
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_removes_bytes() {
        let dir = tempdir().unwrap();
        let store = create_test_store(dir.path()).await;
        let info = put(
            &store,
            b"bytes",
            BlobOptions::new().at(date(2022, 5, 15)).label("k", "v"),
        )
        .await;

        store.purge(&info.blob_ref).await.unwrap();
        assert!(store.info(&info.blob_ref).await.unwrap_err().is_not_found());
        assert!(store.reader_at(&info.blob_ref).await.unwrap_err().is_not_found());
    }
}
