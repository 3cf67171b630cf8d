use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid tag {key:?}={value:?}: {reason}")]
    InvalidTag {
        key: String,
        value: String,
        reason: &'static str,
    },

    #[error("failed to spawn aggregation thread: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("a global metrics recorder is already installed")]
    RecorderInstalled,
}

impl Error {
    #[must_use]
    pub fn invalid_tag(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidTag {
            key: key.into(),
            value: value.into(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
