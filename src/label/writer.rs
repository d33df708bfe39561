//! Label writer: turns label sets into index entries for every day a blob
//! spans, one batch per call.

use crate::blob::{now_ms, Info, Labels, Ref, TimeRange, LABEL_DELETED};
use crate::index::{BlobStoreSchema, Entry, IndexClient};
use crate::storage::error::StorageResult;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LabelWriter {
    client: Arc<IndexClient>,
    schema: BlobStoreSchema,
}

impl LabelWriter {
    pub fn new(client: Arc<IndexClient>, schema: BlobStoreSchema) -> Self {
        Self { client, schema }
    }

    /// Index every info under `metric_name`, stopping at the first failure
    pub async fn put(&self, metric_name: &str, infos: &[Info]) -> StorageResult<()> {
        for info in infos {
            self.put_one(info.time_range(), metric_name, info).await?;
        }
        Ok(())
    }

    pub async fn put_one(
        &self,
        range: TimeRange,
        metric_name: &str,
        info: &Info,
    ) -> StorageResult<()> {
        let entries = self.entries(range, &info.blob_ref, metric_name, &info.labels)?;
        self.write(entries, false).await
    }

    /// Add labels to an indexed blob
    pub async fn put_labels(
        &self,
        r: &Ref,
        metric_name: &str,
        labels: &Labels,
    ) -> StorageResult<()> {
        let entries = self.entries(r.time_range, r, metric_name, labels)?;
        self.write(entries, false).await
    }

    /// Remove label entries; the blob's existence marker stays
    pub async fn del_labels(
        &self,
        r: &Ref,
        metric_name: &str,
        labels: &Labels,
    ) -> StorageResult<()> {
        let entries = self.entries(r.time_range, r, metric_name, labels)?;
        self.write(entries, true).await
    }

    /// Tombstone a blob with `__deleted__=<unix seconds>`
    pub async fn del_one(&self, metric_name: &str, r: &Ref) -> StorageResult<()> {
        let labels = Labels::new().with(LABEL_DELETED, (now_ms() / 1000).to_string());
        self.put_labels(r, metric_name, &labels).await
    }

    fn entries(
        &self,
        range: TimeRange,
        r: &Ref,
        metric_name: &str,
        labels: &Labels,
    ) -> StorageResult<Vec<Entry>> {
        self.schema
            .label_write_entries(range, &r.user_id, metric_name, &r.external_key(), labels)
    }

    async fn write(&self, entries: Vec<Entry>, delete: bool) -> StorageResult<()> {
        let mut batch = self.client.new_write_batch();
        for entry in entries {
            if !delete {
                batch.add(entry);
            } else if !entry.is_metric_marker() {
                batch.delete(entry);
            }
        }
        tracing::trace!(entries = batch.len(), delete, "Writing label batch");
        self.client.batch_write(batch).await
    }
}
