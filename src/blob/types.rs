//! Core blob data types
//!
//! - `TimeRange`: validity window of a blob, in milliseconds
//! - `Ref`: owner + content digest + time range
//! - `Info`: a ref plus its multi-valued labels
//! - `Digest`: `alg:hex` content digest
//! - `BlobOptions`: options applied to an `Info` at writer creation and commit

use crate::storage::error::{StorageError, StorageResult};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Owner assigned to blobs written without an explicit user.
pub const DEFAULT_USER: &str = "0";

/// Reserved tombstone label. A blob carrying it is logically deleted.
pub const LABEL_DELETED: &str = "__deleted__";

/// Digest algorithm used for all content written by this crate.
pub const SHA256: &str = "sha256";

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Midnight UTC of the given calendar date, in milliseconds.
///
/// Out-of-range dates clamp to the epoch.
pub fn date(year: i32, month: u32, day: u32) -> i64 {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// Days since the Unix epoch for a millisecond timestamp (truncating).
pub fn unix_day(t: i64) -> i64 {
    t / MS_PER_DAY
}

/// A closed time interval `[from, through]` in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub through: i64,
}

impl TimeRange {
    pub fn new(from: i64, through: i64) -> Self {
        Self { from, through }
    }

    /// A point-in-time range
    pub fn at(t: i64) -> Self {
        Self { from: t, through: t }
    }

    /// `[from, from + d]`
    pub fn since_from(from: i64, d: Duration) -> Self {
        Self {
            from,
            through: from + d.as_millis() as i64,
        }
    }

    /// `[from - d, from]`
    pub fn last_from(from: i64, d: Duration) -> Self {
        Self {
            from: from - d.as_millis() as i64,
            through: from,
        }
    }

    /// The last `d` up to now
    pub fn last(d: Duration) -> Self {
        Self::last_from(now_ms(), d)
    }

    /// Whether two closed ranges share at least one instant
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.from <= other.through && other.from <= self.through
    }
}

/// Content digest in `alg:hex` form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub alg: String,
    pub hex: String,
}

impl Digest {
    pub fn new(alg: impl Into<String>, hex: impl Into<String>) -> Self {
        Self {
            alg: alg.into(),
            hex: hex.into(),
        }
    }

    /// SHA-256 of an in-memory buffer
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::new(SHA256, hex::encode(Sha256::digest(data)))
    }

    /// SHA-256 of everything readable from `r`
    pub fn from_reader<R: Read>(mut r: R) -> StorageResult<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self::new(SHA256, hex::encode(hasher.finalize())))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.alg, self.hex)
    }
}

impl FromStr for Digest {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((alg, hex)) if !alg.is_empty() && !hex.is_empty() => Ok(Self::new(alg, hex)),
            _ => Err(StorageError::InvalidDigest(s.to_string())),
        }
    }
}

/// Identity of a committed blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    #[serde(flatten)]
    pub time_range: TimeRange,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub alg: String,
    pub hex: String,
}

impl Ref {
    pub fn digest(&self) -> Digest {
        Digest::new(self.alg.clone(), self.hex.clone())
    }

    /// `<user>:<hex from>:<hex through>:<alg>:<hex>`
    pub fn external_key(&self) -> String {
        super::key::format_external_key(self)
    }

    /// `<root>/blobs/<unix_day(from)>/<alg>/<hex>`
    pub fn blob_path(&self, root: &Path) -> PathBuf {
        root.join("blobs")
            .join(unix_day(self.time_range.from).to_string())
            .join(&self.alg)
            .join(&self.hex)
    }
}

/// Multi-valued label set, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, Vec<String>>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style single value add
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    /// Append every value of `other`, keeping existing ones
    pub fn merge(&mut self, other: &Labels) {
        for (k, vv) in other.iter() {
            self.0.entry(k.clone()).or_default().extend(vv.iter().cloned());
        }
    }

    /// Whether `name` carries `value`
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.0
            .get(name)
            .map(|vv| vv.iter().any(|v| v == value))
            .unwrap_or(false)
    }
}

impl Deref for Labels {
    type Target = BTreeMap<String, Vec<String>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Labels {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<BTreeMap<String, Vec<String>>> for Labels {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut labels = Labels::new();
        for (k, v) in iter {
            labels.add(k, v);
        }
        labels
    }
}

impl fmt::Display for Labels {
    /// `{k="v",k="w",z="1"}` with keys sorted and values quoted
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for (k, vv) in self.0.iter() {
            for v in vv {
                if !first {
                    f.write_str(",")?;
                }
                first = false;
                write!(f, "{}={:?}", k, v)?;
            }
        }
        f.write_str("}")
    }
}

/// A blob ref together with its labels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    #[serde(flatten)]
    pub blob_ref: Ref,
    pub labels: Labels,
    /// External key, filled in when the info leaves the store
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub ref_key: String,
}

impl Info {
    /// Info for already-known content, owned by the default user
    pub fn from_digest(digest: Digest, opts: &BlobOptions) -> Self {
        let mut info = Info {
            blob_ref: Ref {
                user_id: DEFAULT_USER.to_string(),
                alg: digest.alg,
                hex: digest.hex,
                time_range: TimeRange::at(now_ms()),
            },
            ..Default::default()
        };
        opts.apply(&mut info);
        info
    }

    pub fn from_reader<R: Read>(r: R, opts: &BlobOptions) -> StorageResult<Self> {
        Ok(Self::from_digest(Digest::from_reader(r)?, opts))
    }

    pub fn from_bytes(data: &[u8], opts: &BlobOptions) -> Self {
        Self::from_digest(Digest::from_bytes(data), opts)
    }

    pub fn from_str_content(s: &str, opts: &BlobOptions) -> Self {
        Self::from_bytes(s.as_bytes(), opts)
    }

    pub fn external_key(&self) -> String {
        self.blob_ref.external_key()
    }

    pub fn time_range(&self) -> TimeRange {
        self.blob_ref.time_range
    }

    pub fn is_deleted(&self) -> bool {
        self.labels.contains_key(LABEL_DELETED)
    }
}

/// Newest first, ties broken by external key
pub fn sort_infos(infos: &mut [Info]) {
    infos.sort_by(|a, b| {
        b.blob_ref
            .time_range
            .from
            .cmp(&a.blob_ref.time_range.from)
            .then_with(|| a.external_key().cmp(&b.external_key()))
    });
}

/// Options applied to an in-progress `Info`
///
/// Labels merge by appending; user and time range overwrite.
#[derive(Debug, Clone, Default)]
pub struct BlobOptions {
    user_id: Option<String>,
    time_range: Option<TimeRange>,
    digest: Option<Digest>,
    labels: Labels,
}

impl BlobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn time_range(mut self, from: i64, through: i64) -> Self {
        self.time_range = Some(TimeRange::new(from, through));
        self
    }

    /// Point-in-time validity: `through == from`
    pub fn at(mut self, t: i64) -> Self {
        self.time_range = Some(TimeRange::at(t));
        self
    }

    /// Digest known before the bytes are written
    pub fn digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn labels(mut self, labels: Labels) -> Self {
        self.labels.merge(&labels);
        self
    }

    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.add(name, value);
        self
    }

    pub fn apply(&self, info: &mut Info) {
        if let Some(user_id) = &self.user_id {
            info.blob_ref.user_id = user_id.clone();
        }
        if let Some(range) = self.time_range {
            info.blob_ref.time_range = range;
        }
        if let Some(digest) = &self.digest {
            info.blob_ref.alg = digest.alg.clone();
            info.blob_ref.hex = digest.hex.clone();
        }
        info.labels.merge(&self.labels);
    }
}
