//! Storage error types
//!
//! Defines all errors that can occur in the blob store and its label index.

use thiserror::Error;

/// Errors that can occur in the blob store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedded index database failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// External key could not be decoded
    #[error("Invalid ref `{key}`: decoding {field}")]
    InvalidRef { field: &'static str, key: String },

    #[error("User not match: expected {expected}, found {found}")]
    UserMismatch { expected: String, found: String },

    /// Blob content or index entry is missing
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Another writer holds the ingest slot for this key
    #[error("Ingest in progress: {0}")]
    IngestInProgress(String),

    #[error("Unexpected commit size {actual}, expected {expected}")]
    UnexpectedCommitSize { expected: u64, actual: u64 },

    #[error("Unexpected commit digest {actual}, expected {expected}")]
    UnexpectedCommitDigest { expected: String, actual: String },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// System labels (leading `_`) cannot be changed by users
    #[error("Label immutable: {0}")]
    LabelImmutable(String),

    /// Read against an index table that was never written
    #[error("Table does not exist: {0}")]
    TableNotFound(String),

    #[error("Invalid range value: {0}")]
    InvalidRangeValue(String),

    #[error("Invalid matcher: {0}")]
    InvalidMatcher(String),

    /// Schema lookup or entry computation failed
    #[error("Schema error: {0}")]
    Schema(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    #[error("Writer already closed")]
    WriterClosed,
}

impl StorageError {
    /// Missing blob, missing index entry or missing table
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) | StorageError::TableNotFound(_) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}

impl From<regex::Error> for StorageError {
    fn from(err: regex::Error) -> Self {
        StorageError::InvalidMatcher(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
