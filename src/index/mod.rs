//! Label index storage
//!
//! - **entry**: `Entry`, `Query`, `WriteBatch`, `ReadBatch`
//! - **range_value**: binary range-value codec
//! - **schema**: daily buckets, row shards, query/entry planning
//! - **table**: one SQLite B-tree per table
//! - **client**: table cache, batched writes, parallel queries
//!
//! # Architecture
//!
//! ```text
//! Labels + TimeRange
//!        ↓
//! Schema: one bucket per UTC day → table "19127", hash key "<user>:d19127"
//!        ↓
//! Entries: blob → labels (forward), shard/label → blob (inverted)
//!        ↓
//! IndexClient: <root>/labels/19127/index.db
//! ```

pub mod client;
pub mod entry;
pub mod range_value;
pub mod schema;
pub mod table;

pub use client::{DbOperation, IndexClient, QueryPagesCallback};
pub use entry::{Entry, Query, ReadBatch, WriteBatch};
pub use range_value::RangeValue;
pub use schema::{
    create_schema, daily_buckets, external_key, schema_for_time, shard_for, BlobStoreSchema,
    Bucket,
};
pub use table::Table;
