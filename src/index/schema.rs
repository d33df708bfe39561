//! Schema: time bucketing, row sharding and entry/query planning
//!
//! Every blob is indexed once per UTC day its time range touches. Within a
//! day bucket, rows are keyed as:
//!
//! ```text
//! blob id                          | metric \0 label \0 h(v) \0 \0 2 \0  = v
//! NN:<user>:d<day>:<metric>        | blob id \0 \0 1 \0                  = [0]
//! NN:<user>:d<day>:<metric>:<label>| h(v) \0 blob id \0 \0 3 \0          = v
//! ```
//!
//! `NN` is the two-digit row shard derived from the blob id.

use crate::blob::{Labels, Ref, TimeRange};
use crate::config::{PeriodConfig, PeriodicTableConfig, SchemaConfig};
use crate::index::entry::{Entry, Query};
use crate::index::range_value::{
    encode_label_value, encode_label_value_blob, encode_metric_name, hash_value,
    range_value_prefix,
};
use crate::storage::error::{StorageError, StorageResult};
use std::fmt::Write as _;

const SECONDS_IN_DAY: i64 = 24 * 60 * 60;
const MILLISECONDS_IN_DAY: i64 = SECONDS_IN_DAY * 1000;
const DEFAULT_ROW_SHARDS: u32 = 16;

/// Period config in effect at `t` (milliseconds)
pub fn schema_for_time(cfg: &SchemaConfig, t: i64) -> StorageResult<&PeriodConfig> {
    let configs = &cfg.configs;
    for (i, period) in configs.iter().enumerate() {
        let starts = t >= period.from_ms();
        let ends = i + 1 == configs.len() || t < configs[i + 1].from_ms();
        if starts && ends {
            return Ok(period);
        }
    }
    Err(StorageError::Schema(format!(
        "no schema config found for time {}",
        t
    )))
}

/// External key of `r`, resolved against the period covering `r.from`.
///
/// Every schema version shares one key format.
pub fn external_key(cfg: &SchemaConfig, r: &Ref) -> StorageResult<String> {
    schema_for_time(cfg, r.time_range.from).map(|_| r.external_key())
}

/// One UTC day of a blob's time range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub table_name: String,
    /// Offset of the range start within the day, in ms
    pub from: u32,
    /// Offset of the range end within the day, in ms
    pub through: u32,
    pub hash_key: String,
    pub bucket_size: u32,
}

impl Bucket {
    /// `NN:<hash_key>[:<key>...]`
    pub fn hash_value_prefix_for(&self, shard: u32, keys: &[&str]) -> String {
        let mut out = String::with_capacity(3 + self.hash_key.len() + keys.len() * 16);
        let _ = write!(out, "{:02}:{}", shard, self.hash_key);
        for k in keys {
            out.push(':');
            out.push_str(k);
        }
        out
    }
}

/// Daily buckets covering `[from, through]` for `user_id`
pub fn daily_buckets(tables: &PeriodicTableConfig, range: TimeRange, user_id: &str) -> Vec<Bucket> {
    let from_day = (range.from / 1000) / SECONDS_IN_DAY;
    let through_day = (range.through / 1000) / SECONDS_IN_DAY;

    (from_day..=through_day)
        .map(|day| {
            let day_start = day * MILLISECONDS_IN_DAY;
            let relative_from = (range.from - day_start).max(0);
            let relative_through = (range.through - day_start).min(MILLISECONDS_IN_DAY);
            Bucket {
                table_name: tables.table_for(day * SECONDS_IN_DAY),
                from: relative_from as u32,
                through: relative_through as u32,
                hash_key: format!("{}:d{}", user_id, day),
                bucket_size: MILLISECONDS_IN_DAY as u32,
            }
        })
        .collect()
}

/// Row shard of a blob id: the first four bytes after its last `:` as a
/// big-endian integer, modulo the shard count.
pub fn shard_for(blob_id: &str, row_shards: u32) -> StorageResult<u32> {
    let row_shards = if row_shards == 0 {
        DEFAULT_ROW_SHARDS
    } else {
        row_shards
    };
    match blob_id.rfind(':') {
        Some(i) if i > 0 => {
            let suffix = &blob_id.as_bytes()[i + 1..];
            let head: [u8; 4] = suffix
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| {
                    StorageError::Schema(format!(
                        "blob id `{}` suffix is shorter than 4 bytes",
                        blob_id
                    ))
                })?;
            Ok(u32::from_be_bytes(head) % row_shards)
        }
        _ => Ok(0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaVersion {
    V1,
}

/// Query and entry planner for one schema period
#[derive(Debug, Clone)]
pub struct BlobStoreSchema {
    version: SchemaVersion,
    row_shards: u32,
    tables: PeriodicTableConfig,
}

/// Build the planner for a period; tables must be day multiples.
pub fn create_schema(cfg: &PeriodConfig) -> StorageResult<BlobStoreSchema> {
    if cfg.index_tables.period_secs > 0
        && cfg.index_tables.period_secs % SECONDS_IN_DAY as u64 != 0
    {
        return Err(StorageError::Schema(
            "the table period must be a multiple of 24h".into(),
        ));
    }
    let version = match cfg.schema.as_str() {
        "v1" => SchemaVersion::V1,
        other => {
            return Err(StorageError::Schema(format!(
                "invalid schema version {:?}",
                other
            )))
        }
    };
    Ok(BlobStoreSchema {
        version,
        row_shards: if cfg.row_shards == 0 {
            DEFAULT_ROW_SHARDS
        } else {
            cfg.row_shards
        },
        tables: cfg.index_tables.clone(),
    })
}

impl BlobStoreSchema {
    pub fn row_shards(&self) -> u32 {
        self.row_shards
    }

    pub fn buckets(&self, range: TimeRange, user_id: &str) -> Vec<Bucket> {
        daily_buckets(&self.tables, range, user_id)
    }

    fn per_bucket<F>(&self, range: TimeRange, user_id: &str, mut f: F) -> Vec<Query>
    where
        F: FnMut(&Bucket, &mut Vec<Query>),
    {
        let mut queries = Vec::new();
        for bucket in self.buckets(range, user_id) {
            f(&bucket, &mut queries);
        }
        queries
    }

    fn per_shard<F>(&self, out: &mut Vec<Query>, f: F)
    where
        F: Fn(u32) -> Query,
    {
        out.extend((0..self.row_shards).map(f));
    }

    /// All label entries of one blob, per bucket
    pub fn metric_label_values_queries(
        &self,
        range: TimeRange,
        user_id: &str,
        metric_name: &str,
        blob_id: &str,
    ) -> Vec<Query> {
        match self.version {
            SchemaVersion::V1 => self.per_bucket(range, user_id, |bucket, out| {
                out.push(Query {
                    table_name: bucket.table_name.clone(),
                    hash_value: blob_id.to_string(),
                    range_value_prefix: range_value_prefix(&[metric_name.as_bytes()]),
                    ..Default::default()
                })
            }),
        }
    }

    /// Every blob under a metric: one query per bucket and shard
    pub fn read_queries_for_metric(
        &self,
        range: TimeRange,
        user_id: &str,
        metric_name: &str,
    ) -> Vec<Query> {
        match self.version {
            SchemaVersion::V1 => self.per_bucket(range, user_id, |bucket, out| {
                self.per_shard(out, |shard| Query {
                    table_name: bucket.table_name.clone(),
                    hash_value: bucket.hash_value_prefix_for(shard, &[metric_name]),
                    ..Default::default()
                })
            }),
        }
    }

    /// Every blob carrying any value for `label_name`
    pub fn read_queries_for_metric_label(
        &self,
        range: TimeRange,
        user_id: &str,
        metric_name: &str,
        label_name: &str,
    ) -> Vec<Query> {
        match self.version {
            SchemaVersion::V1 => self.per_bucket(range, user_id, |bucket, out| {
                self.per_shard(out, |shard| Query {
                    table_name: bucket.table_name.clone(),
                    hash_value: bucket.hash_value_prefix_for(shard, &[metric_name, label_name]),
                    ..Default::default()
                })
            }),
        }
    }

    /// Blobs where `label_name` carries exactly `label_value`
    pub fn read_queries_for_metric_label_value(
        &self,
        range: TimeRange,
        user_id: &str,
        metric_name: &str,
        label_name: &str,
        label_value: &str,
    ) -> Vec<Query> {
        let prefix = range_value_prefix(&[&hash_value(label_value.as_bytes())]);
        match self.version {
            SchemaVersion::V1 => self.per_bucket(range, user_id, |bucket, out| {
                self.per_shard(out, |shard| Query {
                    table_name: bucket.table_name.clone(),
                    hash_value: bucket.hash_value_prefix_for(shard, &[metric_name, label_name]),
                    range_value_prefix: prefix.clone(),
                    value_equal: label_value.as_bytes().to_vec(),
                })
            }),
        }
    }

    /// Forward marker plus a forward/inverted pair per label value, for
    /// every bucket of `range`.
    pub fn label_write_entries(
        &self,
        range: TimeRange,
        user_id: &str,
        metric_name: &str,
        blob_id: &str,
        labels: &Labels,
    ) -> StorageResult<Vec<Entry>> {
        let shard = shard_for(blob_id, self.row_shards)?;
        let mut entries = Vec::new();

        for bucket in self.buckets(range, user_id) {
            let label_row = |label_name: &str| {
                bucket.hash_value_prefix_for(shard, &[metric_name, label_name])
            };

            entries.push(Entry {
                table_name: bucket.table_name.clone(),
                hash_value: bucket.hash_value_prefix_for(shard, &[metric_name]),
                range_value: encode_metric_name(blob_id),
                value: vec![0],
            });

            for (label_name, values) in labels.iter() {
                for label_value in values {
                    entries.push(Entry {
                        table_name: bucket.table_name.clone(),
                        hash_value: blob_id.to_string(),
                        range_value: encode_label_value(metric_name, label_name, label_value),
                        value: label_value.as_bytes().to_vec(),
                    });
                    entries.push(Entry {
                        table_name: bucket.table_name.clone(),
                        hash_value: label_row(label_name),
                        range_value: encode_label_value_blob(label_value, blob_id),
                        value: label_value.as_bytes().to_vec(),
                    });
                }
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::date;
    use chrono::NaiveDate;

    const BLOB_ID: &str =
        "0:1:1:sha256:2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881";

    fn v1() -> BlobStoreSchema {
        create_schema(&PeriodConfig::default()).unwrap()
    }

    #[test]
    fn test_schema_for_time() {
        let mut cfg = SchemaConfig::default();
        let mut second = PeriodConfig::default();
        second.from = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        second.row_shards = 4;
        cfg.configs.push(second);

        assert!(schema_for_time(&cfg, date(2021, 12, 31)).is_err());
        assert_eq!(schema_for_time(&cfg, date(2022, 1, 1)).unwrap().row_shards, 16);
        assert_eq!(schema_for_time(&cfg, date(2022, 12, 31)).unwrap().row_shards, 16);
        assert_eq!(schema_for_time(&cfg, date(2023, 1, 1)).unwrap().row_shards, 4);
        assert!(schema_for_time(&SchemaConfig { configs: vec![] }, 0).is_err());
    }

    #[test]
    fn test_create_schema_validation() {
        let mut cfg = PeriodConfig::default();
        cfg.index_tables.period_secs = 3600;
        assert!(create_schema(&cfg).is_err());

        let mut cfg = PeriodConfig::default();
        cfg.schema = "v2".into();
        assert!(create_schema(&cfg).is_err());

        let mut cfg = PeriodConfig::default();
        cfg.index_tables.period_secs = 0;
        cfg.row_shards = 0;
        let schema = create_schema(&cfg).unwrap();
        assert_eq!(schema.row_shards(), 16);
    }

    #[test]
    fn test_daily_buckets_span_days() {
        let day = date(2022, 5, 15);
        let range = TimeRange::new(day + 1000, day + MILLISECONDS_IN_DAY + 500);
        let buckets = v1().buckets(range, "u");
        assert_eq!(buckets.len(), 2);

        assert_eq!(buckets[0].table_name, "19127");
        assert_eq!(buckets[0].hash_key, "u:d19127");
        assert_eq!(buckets[0].from, 1000);
        assert_eq!(buckets[0].through, MILLISECONDS_IN_DAY as u32);

        assert_eq!(buckets[1].table_name, "19128");
        assert_eq!(buckets[1].from, 0);
        assert_eq!(buckets[1].through, 500);
        assert_eq!(buckets[1].bucket_size, MILLISECONDS_IN_DAY as u32);
    }

    #[test]
    fn test_point_range_is_one_bucket() {
        let t = date(2022, 5, 15) + 42;
        assert_eq!(v1().buckets(TimeRange::at(t), "0").len(), 1);
    }

    #[test]
    fn test_hash_value_prefix() {
        let bucket = &v1().buckets(TimeRange::at(date(2022, 5, 15)), "0")[0];
        assert_eq!(bucket.hash_value_prefix_for(3, &[]), "03:0:d19127");
        assert_eq!(
            bucket.hash_value_prefix_for(12, &["_label", "tag"]),
            "12:0:d19127:_label:tag"
        );
    }

    #[test]
    fn test_shard_is_stable() {
        let expected = u32::from_be_bytes(*b"2d71") % 16;
        for _ in 0..3 {
            assert_eq!(shard_for(BLOB_ID, 16).unwrap(), expected);
        }
        assert_eq!(shard_for("no-colon", 16).unwrap(), 0);
        assert!(shard_for("0:1:1:sha256:ab", 16).is_err());
    }

    #[test]
    fn test_query_fan_out() {
        let schema = v1();
        let day = date(2022, 5, 15);
        let range = TimeRange::new(day, day + MILLISECONDS_IN_DAY);

        assert_eq!(schema.read_queries_for_metric(range, "0", "_label").len(), 32);
        assert_eq!(
            schema
                .read_queries_for_metric_label(range, "0", "_label", "tag")
                .len(),
            32
        );

        let queries =
            schema.read_queries_for_metric_label_value(range, "0", "_label", "tag", "face");
        assert_eq!(queries.len(), 32);
        assert_eq!(queries[0].value_equal, b"face".to_vec());
        assert_eq!(queries[0].hash_value, "00:0:d19127:_label:tag");

        let queries = schema.metric_label_values_queries(range, "0", "_label", BLOB_ID);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].hash_value, BLOB_ID);
        assert_eq!(queries[0].range_value_prefix, b"_label\x00".to_vec());
    }

    #[test]
    fn test_label_write_entries() {
        let labels = Labels::new().with("tag", "face").with("tag", "secure");
        let range = TimeRange::at(date(2022, 5, 15));
        let entries = v1()
            .label_write_entries(range, "0", "_label", BLOB_ID, &labels)
            .unwrap();

        assert_eq!(entries.len(), 5);
        let shard = shard_for(BLOB_ID, 16).unwrap();
        assert!(entries[0].is_metric_marker());
        assert_eq!(
            entries[0].hash_value,
            format!("{:02}:0:d19127:_label", shard)
        );
        assert_eq!(entries[1].hash_value, BLOB_ID);
        assert_eq!(entries[1].value, b"face".to_vec());
        assert_eq!(
            entries[2].hash_value,
            format!("{:02}:0:d19127:_label:tag", shard)
        );
        assert!(entries.iter().all(|e| e.table_name == "19127"));
    }
}
