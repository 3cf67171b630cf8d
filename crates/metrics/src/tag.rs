//! Key/value metadata attached to metrics.
//!
//! Tags take part in metric identity, so their text must never contain the
//! separators used by the key encoding (`&`, `=`, `?` and the sample
//! delimiter `#`). Validation happens once, when the tag is built.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Characters that delimit parts of an encoded key.
pub const RESERVED: [char; 4] = ['&', '=', '?', '#'];

/// A single `key=value` pair.
///
/// Ordering is by key, then by value, which is the canonical order used for
/// key encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTag")]
pub struct Tag {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct RawTag {
    key: String,
    value: String,
}

impl Tag {
    /// Build a tag, rejecting text that would corrupt key encoding.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let value = value.into();

        if key.is_empty() {
            return Err(Error::invalid_tag(key, value, "empty key"));
        }
        if key.contains(RESERVED) {
            return Err(Error::invalid_tag(key, value, "key contains a reserved character"));
        }
        if value.contains(RESERVED) {
            return Err(Error::invalid_tag(
                key,
                value,
                "value contains a reserved character",
            ));
        }

        Ok(Self { key, value })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl TryFrom<RawTag> for Tag {
    type Error = Error;

    fn try_from(raw: RawTag) -> Result<Self> {
        Self::new(raw.key, raw.value)
    }
}

impl TryFrom<(&str, &str)> for Tag {
    type Error = Error;

    fn try_from((key, value): (&str, &str)) -> Result<Self> {
        Self::new(key, value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Sort tags into canonical order.
pub fn sort_tags(tags: &mut [Tag]) {
    tags.sort_unstable();
}

/// Combine engine-wide tags with call-site tags into one sorted set.
///
/// Duplicate keys are kept as-is.
#[must_use]
pub fn merge_tags(engine: &[Tag], call_site: &[Tag]) -> Vec<Tag> {
    let mut tags = Vec::with_capacity(engine.len() + call_site.len());
    tags.extend_from_slice(engine);
    tags.extend_from_slice(call_site);
    sort_tags(&mut tags);
    tags
}

/// Render tags as `k1=v1&k2=v2`, in the order given.
#[must_use]
pub fn query_string(tags: &[Tag]) -> String {
    let mut out = String::new();
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(&tag.key);
        out.push('=');
        out.push_str(&tag.value);
    }
    out
}
