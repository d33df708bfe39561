//! Range-value codec for inverted index keys
//!
//! A range value is a list of null-terminated parts followed by a one byte
//! kind marker and a final null:
//!
//! ```text
//! part0 \0 part1 \0 ... \0 <marker> \0
//! ```
//!
//! Every encoder ends with an empty part, so a valid key always has a null
//! three bytes from the end.
//!
//! | Marker | Variant          | Parts                                  |
//! |--------|------------------|----------------------------------------|
//! | `1`    | `MetricName`     | blob id                                |
//! | `2`    | `LabelValue`     | metric, label name, b64(sha256(value)) |
//! | `3`    | `LabelValueBlob` | b64(sha256(value)), blob id            |

use crate::storage::error::{StorageError, StorageResult};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

pub const MARKER_METRIC_NAME: u8 = b'1';
pub const MARKER_LABEL_VALUE: u8 = b'2';
pub const MARKER_LABEL_VALUE_BLOB: u8 = b'3';

/// A decoded range value, borrowing the encoded bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeValue<'a> {
    /// Forward marker: this blob exists under a metric
    MetricName(&'a [u8]),
    /// Per-blob label entry
    LabelValue(&'a [u8]),
    /// Inverted label entry: value hash to blob
    LabelValueBlob(&'a [u8]),
    /// Written by a newer schema; carried through untouched
    Unknown(&'a [u8]),
}

impl<'a> RangeValue<'a> {
    pub fn decode(rv: &'a [u8]) -> StorageResult<Self> {
        let n = rv.len();
        if n < 3 || rv[n - 1] != 0 || rv[n - 3] != 0 {
            return Err(StorageError::InvalidRangeValue(format!(
                "{:?}",
                String::from_utf8_lossy(rv)
            )));
        }
        Ok(match rv[n - 2] {
            MARKER_METRIC_NAME => RangeValue::MetricName(rv),
            MARKER_LABEL_VALUE => RangeValue::LabelValue(rv),
            MARKER_LABEL_VALUE_BLOB => RangeValue::LabelValueBlob(rv),
            _ => RangeValue::Unknown(rv),
        })
    }

    pub fn marker(&self) -> u8 {
        match self {
            RangeValue::MetricName(_) => MARKER_METRIC_NAME,
            RangeValue::LabelValue(_) => MARKER_LABEL_VALUE,
            RangeValue::LabelValueBlob(_) => MARKER_LABEL_VALUE_BLOB,
            RangeValue::Unknown(_) => 0,
        }
    }

    /// Blob id carried by `MetricName` and `LabelValueBlob` entries
    pub fn blob_id(&self) -> Option<String> {
        match self {
            RangeValue::MetricName(rv) => Some(part_string(rv, 0)),
            RangeValue::LabelValueBlob(rv) => Some(part_string(rv, 1)),
            _ => None,
        }
    }

    pub fn metric_name(&self) -> Option<String> {
        match self {
            RangeValue::LabelValue(rv) => Some(part_string(rv, 0)),
            _ => None,
        }
    }

    pub fn label_name(&self) -> Option<String> {
        match self {
            RangeValue::LabelValue(rv) => Some(part_string(rv, 1)),
            _ => None,
        }
    }
}

/// `blob_id \0 \0 1 \0`
pub fn encode_metric_name(blob_id: &str) -> Vec<u8> {
    encode(MARKER_METRIC_NAME, &[blob_id.as_bytes(), b""])
}

/// `metric \0 label \0 b64(sha256(value)) \0 \0 2 \0`
pub fn encode_label_value(metric_name: &str, label_name: &str, label_value: &str) -> Vec<u8> {
    let hashed = hash_value(label_value.as_bytes());
    encode(
        MARKER_LABEL_VALUE,
        &[metric_name.as_bytes(), label_name.as_bytes(), &hashed, b""],
    )
}

/// `b64(sha256(value)) \0 blob_id \0 \0 3 \0`
pub fn encode_label_value_blob(label_value: &str, blob_id: &str) -> Vec<u8> {
    let hashed = hash_value(label_value.as_bytes());
    encode(
        MARKER_LABEL_VALUE_BLOB,
        &[&hashed, blob_id.as_bytes(), b""],
    )
}

/// Parts joined and terminated by nulls, with no marker
pub fn range_value_prefix(parts: &[&[u8]]) -> Vec<u8> {
    build(0, parts)
}

/// Unpadded standard base64 of the SHA-256 of `v`
pub fn hash_value(v: &[u8]) -> Vec<u8> {
    STANDARD_NO_PAD.encode(Sha256::digest(v)).into_bytes()
}

fn encode(marker: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut out = build(2, parts);
    let n = out.len();
    out[n - 2] = marker;
    out
}

fn build(extra: usize, parts: &[&[u8]]) -> Vec<u8> {
    let len = extra + parts.iter().map(|p| p.len() + 1).sum::<usize>();
    let mut out = Vec::with_capacity(len);
    for p in parts {
        out.extend_from_slice(p);
        out.push(0);
    }
    out.resize(len, 0);
    out
}

/// The `idx`-th null-separated part, or the remainder past the last null.
pub fn read_part(rv: &[u8], idx: usize) -> &[u8] {
    let mut count = 0;
    let mut left = 0;
    for (i, b) in rv.iter().enumerate() {
        if *b == 0 {
            if count == idx {
                return &rv[left..i];
            }
            count += 1;
            left = i + 1;
        }
    }
    &rv[left..]
}

fn part_string(rv: &[u8], idx: usize) -> String {
    String::from_utf8_lossy(read_part(rv, idx)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_value_layout() {
        let rv = encode_label_value("_label", "x", "v");
        assert_eq!(
            rv,
            b"_label\x00x\x00TJRIXgwhrmxBzh3+e2v6zupato5AokdvUCCOUm9QYIA\x00\x002\x00".to_vec()
        );

        let decoded = RangeValue::decode(&rv).unwrap();
        assert!(matches!(decoded, RangeValue::LabelValue(_)));
        assert_eq!(decoded.metric_name().as_deref(), Some("_label"));
        assert_eq!(decoded.label_name().as_deref(), Some("x"));
        assert_eq!(decoded.blob_id(), None);
    }

    #[test]
    fn test_metric_name_carries_blob_id() {
        let rv = encode_metric_name("0:1:1:sha256:abcd");
        assert_eq!(rv, b"0:1:1:sha256:abcd\x00\x001\x00".to_vec());
        let decoded = RangeValue::decode(&rv).unwrap();
        assert_eq!(decoded.marker(), MARKER_METRIC_NAME);
        assert_eq!(decoded.blob_id().as_deref(), Some("0:1:1:sha256:abcd"));
    }

    #[test]
    fn test_label_value_blob_carries_blob_id() {
        let rv = encode_label_value_blob("v", "blob-1");
        let decoded = RangeValue::decode(&rv).unwrap();
        assert!(matches!(decoded, RangeValue::LabelValueBlob(_)));
        assert_eq!(decoded.blob_id().as_deref(), Some("blob-1"));
        assert!(rv.starts_with(&range_value_prefix(&[&hash_value(b"v")])));
    }

    #[test]
    fn test_unknown_marker_is_tolerated() {
        let rv = b"a\x00\x009\x00";
        assert!(matches!(
            RangeValue::decode(rv).unwrap(),
            RangeValue::Unknown(_)
        ));
    }

    #[test]
    fn test_malformed_range_values() {
        for rv in [&b""[..], b"\x00\x00", b"abc", b"a\x001\x00x", b"ab1\x00"] {
            assert!(RangeValue::decode(rv).is_err(), "{:?}", rv);
        }
    }

    #[test]
    fn test_read_part_out_of_range_returns_remainder() {
        assert_eq!(read_part(b"a\x00b\x00c", 1), b"b");
        assert_eq!(read_part(b"a\x00b\x00c", 5), b"c");
        assert_eq!(read_part(b"abc", 0), b"abc");
    }
}
