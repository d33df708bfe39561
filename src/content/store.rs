//! Content store: two-phase ingest of blob bytes
//!
//! ```text
//! writer()  → <root>/ingest/<sha256(pending external key)>/data
//! write()   → append + streaming sha256
//! commit()  → fsync, verify size/digest, rename → <root>/blobs/<day>/<alg>/<hex>
//! ```
//!
//! Partial data only ever lives under `ingest/`.

use crate::blob::{check_user_id, now_ms, BlobOptions, Digest, Info, Ref, DEFAULT_USER, SHA256};
use crate::content::reader::BlobReader;
use crate::storage::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const DATA_FILE: &str = "data";

/// Byte-level blob storage rooted at one directory
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("ingest"))?;
        Ok(Self {
            root,
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open an ingest transaction.
    ///
    /// `from` defaults to now. When the options already name a digest whose
    /// final path exists, fails with `AlreadyExists`. User ids containing a
    /// key delimiter are rejected.
    pub fn writer(&self, opts: &BlobOptions) -> StorageResult<ContentWriter> {
        let mut info = Info::default();
        opts.apply(&mut info);
        check_user_id(&info.blob_ref.user_id)?;
        if info.blob_ref.time_range.from == 0 {
            info.blob_ref.time_range.from = now_ms();
        }

        if !info.blob_ref.hex.is_empty() && info.blob_ref.blob_path(&self.root).exists() {
            return Err(StorageError::AlreadyExists(info.blob_ref.hex.clone()));
        }

        let ingest_dir = self.ingest_root(&info);
        let slot = IngestSlot::acquire(Arc::clone(&self.active), ingest_dir.clone())?;

        match std::fs::create_dir(&ingest_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(ingest_dir.join(DATA_FILE))?;

        let expected = (!info.blob_ref.hex.is_empty()).then(|| info.blob_ref.digest());
        let now = Utc::now();

        Ok(ContentWriter {
            root: self.root.clone(),
            info,
            file: Some(file),
            ingest_dir,
            offset: 0,
            hasher: Sha256::new(),
            expected,
            started_at: now,
            updated_at: now,
            _slot: slot,
        })
    }

    /// Sized random-access reader over a committed blob
    pub fn reader_at(&self, r: &Ref) -> StorageResult<BlobReader> {
        BlobReader::open(&r.blob_path(&self.root))
    }

    /// Remove a committed blob's bytes
    pub fn delete(&self, r: &Ref) -> StorageResult<()> {
        let path = r.blob_path(&self.root);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("content {}", r.hex)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ingest_root(&self, info: &Info) -> PathBuf {
        let key = info.external_key();
        self.root
            .join("ingest")
            .join(hex::encode(Sha256::digest(key.as_bytes())))
    }
}

/// Claim on an ingest directory, released on drop
#[derive(Debug)]
struct IngestSlot {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    dir: PathBuf,
}

impl IngestSlot {
    fn acquire(active: Arc<Mutex<HashSet<PathBuf>>>, dir: PathBuf) -> StorageResult<Self> {
        {
            let mut set = active
                .lock()
                .map_err(|e| StorageError::Lock(e.to_string()))?;
            if !set.insert(dir.clone()) {
                return Err(StorageError::IngestInProgress(dir.display().to_string()));
            }
        }
        Ok(Self { active, dir })
    }
}

impl Drop for IngestSlot {
    fn drop(&mut self) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(&self.dir);
        }
    }
}

/// Progress of an open ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub offset: u64,
    pub total: u64,
    pub expected: Option<Digest>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An open ingest transaction
#[derive(Debug)]
pub struct ContentWriter {
    root: PathBuf,
    info: Info,
    file: Option<File>,
    ingest_dir: PathBuf,
    offset: u64,
    hasher: Sha256,
    expected: Option<Digest>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    _slot: IngestSlot,
}

impl ContentWriter {
    /// Snapshot of the in-progress info; complete after a successful commit
    pub fn info(&self) -> Info {
        self.info.clone()
    }

    pub fn status(&self) -> StorageResult<Status> {
        Ok(Status {
            offset: self.offset,
            total: self.offset,
            expected: self.expected.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        })
    }

    /// Discard written bytes. Only size 0 is supported.
    pub fn truncate(&mut self, size: u64) -> StorageResult<()> {
        if size != 0 {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "truncate: unsupported size",
            )));
        }
        let file = self.file.as_mut().ok_or(StorageError::WriterClosed)?;
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        self.offset = 0;
        self.hasher = Sha256::new();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Verify and move the ingested bytes to their content-addressed path.
    ///
    /// `size == 0` skips the size check. On a size or digest mismatch the
    /// ingest data is left in place and the writer is closed.
    pub fn commit(
        &mut self,
        size: u64,
        expected: Option<&Digest>,
        opts: &BlobOptions,
    ) -> StorageResult<()> {
        opts.apply(&mut self.info);
        let r = &mut self.info.blob_ref;
        check_user_id(&r.user_id)?;
        if r.user_id.is_empty() {
            r.user_id = DEFAULT_USER.to_string();
        }
        if r.time_range.through == 0 {
            r.time_range.through = r.time_range.from;
        }

        let file = self.file.take().ok_or(StorageError::WriterClosed)?;
        file.sync_all()?;
        let actual = file.metadata()?.len();
        drop(file);

        if size > 0 && size != actual {
            return Err(StorageError::UnexpectedCommitSize {
                expected: size,
                actual,
            });
        }

        let digest = Digest::new(SHA256, hex::encode(self.hasher.clone().finalize()));
        if let Some(expected) = expected {
            if *expected != digest {
                return Err(StorageError::UnexpectedCommitDigest {
                    expected: expected.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        r.alg = digest.alg;
        r.hex = digest.hex;

        let ingest = self.ingest_dir.join(DATA_FILE);
        let target = r.blob_path(&self.root);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&ingest, &target)?;

        if let Err(e) = std::fs::remove_dir_all(&self.ingest_dir) {
            tracing::warn!(path = ?self.ingest_dir, "Failed to remove ingest directory: {}", e);
        }

        Ok(())
    }

    /// Sync and close without committing
    pub fn close(&mut self) -> StorageResult<()> {
        if let Some(file) = self.file.take() {
            let _ = file.sync_all();
        }
        Ok(())
    }
}

impl Write for ContentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer closed"))?;
        let n = file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.offset += n as u64;
        self.updated_at = Utc::now();
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
