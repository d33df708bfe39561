//! Label index over the KV client
//!
//! - **matcher**: `Matcher`, `MatchType`, literal set extraction
//! - **selector**: `{name="v",...}` parsing and formatting
//! - **writer**: `LabelWriter`
//! - **reader**: `LabelIndexStore`
//!
//! Every blob's labels live under the `_label` metric.

pub mod matcher;
pub mod reader;
pub mod selector;
pub mod util;
pub mod writer;

pub use matcher::{find_set_matches, MatchType, Matcher};
pub use reader::LabelIndexStore;
pub use selector::{format_selector, parse_selector};
pub use writer::LabelWriter;

/// Metric name all blob labels are indexed under
pub const METRIC_LABEL: &str = "_label";
