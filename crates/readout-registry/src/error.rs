//! Error types for `readout-registry`.

use thiserror::Error;

/// A registry record that cannot become a trial. Logged and skipped by the
/// sync orchestrator; never fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
  #[error("record is not a JSON object")]
  NotAnObject,

  #[error("record has no trial identifier")]
  MissingIdentifier,
}

/// The fetcher gave up on a topic.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("registry returned HTTP {status} for topic {topic} after {attempts} attempt(s)")]
  Status {
    topic:    String,
    status:   u16,
    attempts: u32,
  },

  #[error("request for topic {topic} failed after {attempts} attempt(s): {message}")]
  Transport {
    topic:    String,
    attempts: u32,
    message:  String,
  },

  #[error("could not decode registry response for topic {topic}: {message}")]
  Decode { topic: String, message: String },

  #[error("failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),
}

impl FetchError {
  /// The last HTTP status seen, if the failure was a status failure.
  pub fn last_status(&self) -> Option<u16> {
    match self {
      Self::Status { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn topic(&self) -> Option<&str> {
    match self {
      Self::Status { topic, .. }
      | Self::Transport { topic, .. }
      | Self::Decode { topic, .. } => Some(topic),
      Self::Client(_) => None,
    }
  }
}

/// The citation index could not be queried for one trial.
#[derive(Debug, Error)]
pub enum CitationError {
  #[error("citation index returned HTTP {status} for {nct_id}")]
  Status { nct_id: String, status: u16 },

  #[error("citation request for {nct_id} failed: {message}")]
  Transport { nct_id: String, message: String },

  #[error("could not decode citation response for {nct_id}: {message}")]
  Decode { nct_id: String, message: String },

  #[error("failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),
}
