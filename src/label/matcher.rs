//! Label matchers
//!
//! ```text
//! name="v"    Equal
//! name!="v"   NotEqual
//! name=~"re"  Regexp      (anchored: ^(?:re)$)
//! name!~"re"  NotRegexp
//! ```

use crate::storage::error::StorageResult;
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regexp,
    NotRegexp,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regexp => "=~",
            MatchType::NotRegexp => "!~",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single label predicate
#[derive(Debug, Clone)]
pub struct Matcher {
    pub kind: MatchType,
    pub name: String,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    /// Build a matcher; regex kinds compile their value fully anchored.
    pub fn new(
        kind: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> StorageResult<Self> {
        let value = value.into();
        let re = match kind {
            MatchType::Regexp | MatchType::NotRegexp => {
                Some(Regex::new(&format!("^(?:{})$", value))?)
            }
            _ => None,
        };
        Ok(Self {
            kind,
            name: name.into(),
            value,
            re,
        })
    }

    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: MatchType::Equal,
            name: name.into(),
            value: value.into(),
            re: None,
        }
    }

    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: MatchType::NotEqual,
            name: name.into(),
            value: value.into(),
            re: None,
        }
    }

    pub fn matches(&self, s: &str) -> bool {
        match self.kind {
            MatchType::Equal => s == self.value,
            MatchType::NotEqual => s != self.value,
            MatchType::Regexp => self.re.as_ref().map(|re| re.is_match(s)).unwrap_or(false),
            MatchType::NotRegexp => self.re.as_ref().map(|re| !re.is_match(s)).unwrap_or(true),
        }
    }

    /// Literal alternatives of a `Regexp` matcher such as `a|b\.c`
    pub fn set_matches(&self) -> Option<Vec<String>> {
        if self.kind != MatchType::Regexp {
            return None;
        }
        find_set_matches(&self.value).filter(|set| !set.is_empty())
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.name == other.name && self.value == other.value
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.kind, self.value)
    }
}

fn is_regex_meta_character(b: u8) -> bool {
    matches!(
        b,
        b'.' | b'+' | b'*' | b'?' | b'(' | b')' | b'|' | b'[' | b']' | b'{' | b'}' | b'^' | b'$'
    )
}

/// Split a regex made only of escaped literals joined by `|` into its
/// alternatives. Returns `None` when any other regex syntax appears.
pub fn find_set_matches(pattern: &str) -> Option<Vec<String>> {
    let mut sets: Vec<Vec<u8>> = vec![Vec::new()];
    let mut escaped = false;

    for &b in pattern.as_bytes() {
        let current = sets.last_mut()?;
        if escaped {
            if is_regex_meta_character(b) || b == b'\\' {
                current.push(b);
            } else {
                return None;
            }
            escaped = false;
        } else if is_regex_meta_character(b) {
            if b != b'|' {
                return None;
            }
            sets.push(Vec::new());
        } else if b == b'\\' {
            escaped = true;
        } else {
            current.push(b);
        }
    }

    Some(
        sets.into_iter()
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(&s).into_owned())
            .collect(),
    )
}
