//! Error types for `readout-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A topic, scoring, ranking, or fetch configuration that cannot be used.
///
/// Raised before any network call is made.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
  #[error("at least one topic must be configured")]
  NoTopics,

  #[error("topic id must not be empty")]
  EmptyTopicId,

  #[error("duplicate topic id: {0}")]
  DuplicateTopic(String),

  #[error("unknown topic: {0}")]
  UnknownTopic(String),

  #[error("topic {0} has no query parameters")]
  EmptyQuery(String),

  #[error("topic {topic} has an empty {list} entry")]
  EmptyKeyword { topic: String, list: &'static str },

  #[error("{field} must be {expected}, got {value}")]
  Invalid {
    field:    String,
    expected: &'static str,
    value:    String,
  },
}

impl ConfigError {
  pub fn invalid(
    field: impl Into<String>,
    expected: &'static str,
    value: impl ToString,
  ) -> Self {
    Self::Invalid { field: field.into(), expected, value: value.to_string() }
  }
}

/// Fail unless `value` is a finite, non-negative number.
pub fn ensure_weight(field: &str, value: f64) -> Result<(), ConfigError> {
  if value.is_finite() && value >= 0.0 {
    Ok(())
  } else {
    Err(ConfigError::invalid(field, "a finite non-negative number", value))
  }
}
