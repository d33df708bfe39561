//! Content-addressed blob bytes
//!
//! ```text
//! <root>/ingest/<sha256(key)>/data        in-progress writes
//! <root>/blobs/<day>/<alg>/<hex>          committed, immutable
//! ```

pub mod reader;
pub mod store;

pub use reader::{BlobReader, SectionReader};
pub use store::{ContentStore, ContentWriter, Status};
