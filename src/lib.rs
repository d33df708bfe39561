//! # Mediastore
//!
//! Content-addressable blob store for media artifacts (frames, clips) with a
//! time-bucketed inverted label index.
//!
//! ## Features
//!
//! - **Two-phase ingest**: bytes land under `ingest/`, are verified, then renamed into place
//! - **Content addressing**: `blobs/<day>/<alg>/<hex>` dedups identical bytes per day
//! - **Label index**: forward and inverted entries in one SQLite table per day
//! - **Parallel queries**: one task per matcher, bounded worker pool per client
//! - **Logical deletes**: tombstone labels hide blobs without touching bytes
//!
//! ## Modules
//!
//! - [`blob`]: refs, labels, external key codec
//! - [`content`]: ingest, commit, read, delete of blob bytes
//! - [`index`]: range-value codec, schema, KV client
//! - [`label`]: matchers, label writer and reader
//! - [`storage`]: `Store` façade, errors, dataset export
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mediastore::blob::{BlobOptions, TimeRange};
//! use mediastore::label::Matcher;
//! use mediastore::storage::{Ingester, Manager, Store};
//! use std::io::Write;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open_dir("./data").await?;
//!
//!     let mut w = store
//!         .writer(&BlobOptions::new().label("mediaType", "text/plain"))
//!         .await?;
//!     w.write_all(b"1234")?;
//!     w.commit(4, None, &BlobOptions::new()).await?;
//!     let info = w.info();
//!
//!     let matchers = [Matcher::equal("mediaType", "text/plain")];
//!     let found = store
//!         .query(TimeRange::last(Duration::from_secs(3600)), "0", &matchers)
//!         .await?;
//!     println!("{} blobs, newest {}", found.len(), info.external_key());
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod blob;
pub mod config;
pub mod content;
pub mod index;
pub mod label;
pub mod logging;
pub mod storage;
