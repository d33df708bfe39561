//! External key codec
//!
//! ```text
//! <user_id>:<hex from>:<hex through>:<alg>:<hex digest>
//! ```
//!
//! Times are signed base-16, lowercase, unpadded. Parsing also accepts
//! `/` as a field delimiter.

use super::types::{Info, Ref, TimeRange};
use crate::storage::error::{StorageError, StorageResult};
use std::fmt::Write as _;

const DIGEST_HEX_LEN: usize = 64;

pub fn format_external_key(r: &Ref) -> String {
    let mut out = String::with_capacity(r.user_id.len() + 32 + r.alg.len() + r.hex.len());
    out.push_str(&r.user_id);
    out.push(':');
    push_signed_hex(&mut out, r.time_range.from);
    out.push(':');
    push_signed_hex(&mut out, r.time_range.through);
    out.push(':');
    out.push_str(&r.alg);
    out.push(':');
    out.push_str(&r.hex);
    out
}

fn push_signed_hex(out: &mut String, v: i64) {
    if v < 0 {
        out.push('-');
    }
    let _ = write!(out, "{:x}", v.unsigned_abs());
}

/// Reject user ids that cannot round-trip through an external key.
///
/// Empty is allowed; it means "default user" on write and "any user" on parse.
pub fn check_user_id(user_id: &str) -> StorageResult<()> {
    if user_id.contains(is_delimiter) {
        return Err(StorageError::InvalidRef {
            field: "user",
            key: user_id.to_string(),
        });
    }
    Ok(())
}

/// Parse an external key into an `Info` with empty labels.
///
/// A non-empty `expect_user_id` must equal the key's user.
pub fn parse_external_key(key: &str, expect_user_id: &str) -> StorageResult<Info> {
    let invalid = |field: &'static str| StorageError::InvalidRef {
        field,
        key: key.to_string(),
    };

    let user_idx = match key.find(':') {
        Some(i) if i + 1 < key.len() => i,
        _ => return Err(invalid("user")),
    };
    let user_id = &key[..user_idx];
    if !expect_user_id.is_empty() && expect_user_id != user_id {
        return Err(StorageError::UserMismatch {
            expected: expect_user_id.to_string(),
            found: user_id.to_string(),
        });
    }

    let mut rest = &key[user_idx + 1..];

    let (part, tail) = next_part(rest).ok_or_else(|| invalid("start"))?;
    let from = parse_signed_hex(part).ok_or_else(|| invalid("start"))?;
    rest = tail;

    let (part, tail) = next_part(rest).ok_or_else(|| invalid("through"))?;
    let through = parse_signed_hex(part).ok_or_else(|| invalid("through"))?;
    rest = tail;

    let (alg, tail) = next_part(rest).ok_or_else(|| invalid("alg"))?;
    rest = tail;

    let hex = match rest.find(is_delimiter) {
        Some(i) if i > 0 => &rest[..i],
        _ => rest,
    };
    if hex.len() != DIGEST_HEX_LEN {
        return Err(invalid("hex"));
    }

    Ok(Info {
        blob_ref: Ref {
            user_id: user_id.to_string(),
            alg: alg.to_string(),
            hex: hex.to_string(),
            time_range: TimeRange::new(from, through),
        },
        ..Default::default()
    })
}

/// Split off one non-empty field that is followed by a delimiter and more data.
fn next_part(s: &str) -> Option<(&str, &str)> {
    let i = s.find(is_delimiter)?;
    if i == 0 || i + 1 >= s.len() {
        return None;
    }
    Some((&s[..i], &s[i + 1..]))
}

fn is_delimiter(c: char) -> bool {
    c == ':' || c == '/'
}

fn parse_signed_hex(s: &str) -> Option<i64> {
    i64::from_str_radix(s, 16).ok()
}
