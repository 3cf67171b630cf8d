use serde::{Deserialize, Serialize};

use crate::tag::Tag;

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prepended to every metric name as `prefix.name` (empty: no prefix)
    pub prefix: String,
    /// Tags merged into every metric's tag set
    pub tags: Vec<Tag>,
}

impl EngineConfig {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());

        let config: EngineConfig = serde_json::from_str(
            r#"{"prefix":"test","tags":[{"key":"hello","value":"world"}]}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            EngineConfig::new("test").with_tag(Tag::new("hello", "world").unwrap())
        );
    }

    #[test]
    fn test_rejects_invalid_tags() {
        let result = serde_json::from_str::<EngineConfig>(
            r#"{"tags":[{"key":"hello","value":"a&b"}]}"#,
        );
        assert!(result.is_err());
    }
}
