//! Blob identity
//!
//! - **types**: `Ref`, `Info`, `Labels`, `TimeRange`, `Digest`, `BlobOptions`
//! - **key**: external key parse/format
//!
//! ```text
//! ExternalKey: 0:180c7d6b800:180c7d6b800:sha256:2d71...4881
//! BlobPath:    <root>/blobs/19127/sha256/2d71...4881
//! ```

pub mod key;
pub mod types;

pub use key::{check_user_id, format_external_key, parse_external_key};
pub use types::{
    date, now_ms, sort_infos, unix_day, BlobOptions, Digest, Info, Labels, Ref, TimeRange,
    DEFAULT_USER, LABEL_DELETED, SHA256,
};
