//! Store façade, error types and dataset export
//!
//! - **engine**: `Store` and the `Ingester`/`Provider`/`Manager`/`Writer` traits
//! - **export**: gzip-compressed tar of blobs plus a labels file
//! - **error**: error types
//!
//! # Example
//!
//! ```rust,no_run
//! use mediastore::blob::{date, BlobOptions, TimeRange};
//! use mediastore::label::parse_selector;
//! use mediastore::storage::{Ingester, Manager, Store};
//! use std::io::Write;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open_dir("./data").await?;
//!
//!     let t = date(2022, 5, 15);
//!     let mut w = store
//!         .writer(&BlobOptions::new().at(t).label("mediaType", "image/jpeg"))
//!         .await?;
//!     w.write_all(b"...")?;
//!     w.commit(3, None, &BlobOptions::new()).await?;
//!
//!     let range = TimeRange::since_from(t, Duration::from_secs(24 * 3600));
//!     let matchers = parse_selector(r#"{mediaType=~"image/.*"}"#)?;
//!     let infos = store.query(range, "0", &matchers).await?;
//!     println!("Found {} images", infos.len());
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod export;

pub use engine::{Ingester, Manager, Provider, Store, Writer};
pub use error::{StorageError, StorageResult};
pub use export::{export_dataset, export_path};
