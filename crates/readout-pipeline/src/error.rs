//! Error type for `readout-pipeline`.

use readout_core::ConfigError;
use thiserror::Error;

/// Failures that stop a whole pipeline operation.
///
/// Record- and topic-level failures never surface here; they are counted on
/// the sync run or the link report instead.
#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
