//! Canonical metric identities.
//!
//! A key is `name?k1=v1&k2=v2` with tags sorted, so the same name and tag
//! set always encode to the same string whatever order the tags came in.
//! Histogram samples share a group identity and are told apart by a
//! `#<index>` suffix.

use crate::tag::{Tag, query_string, sort_tags};

/// Separator between the engine prefix and a metric name.
pub const PREFIX_SEPARATOR: char = '.';

/// Tag key that names a timer lap.
pub const STAMP_TAG: &str = "stamp";

/// Stamp value used for the final duration of a timer.
pub const TOTAL_STAMP: &str = "total";

/// Encode the identity of `name` with `tags`.
#[must_use]
pub fn encode(name: &str, tags: &[Tag]) -> String {
    let mut sorted = tags.to_vec();
    sort_tags(&mut sorted);
    encode_sorted(name, &sorted)
}

/// Identity shared by every sample of one histogram series.
#[must_use]
pub fn encode_group(name: &str, tags: &[Tag]) -> String {
    encode(name, tags)
}

/// Key of the sample at `index` within `group`.
#[must_use]
pub fn sample_key(group: &str, index: u64) -> String {
    format!("{group}#{index}")
}

/// Qualify `name` with the engine prefix.
#[must_use]
pub fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}{PREFIX_SEPARATOR}{name}")
    }
}

/// Encode with tags that are already in canonical order.
pub(crate) fn encode_sorted(name: &str, tags: &[Tag]) -> String {
    let query = query_string(tags);
    let mut key = String::with_capacity(name.len() + 1 + query.len());
    key.push_str(name);
    key.push('?');
    key.push_str(&query);
    key
}
