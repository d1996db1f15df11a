//! `readout.toml` plus `READOUT__*` environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use readout_core::{ConfigError, topic::{TopicConfig, validate_topics}};
use readout_pipeline::DigestSettings;
use readout_registry::{CitationSettings, FetchSettings};
use readout_scoring::ScoringWeights;
use readout_store_sqlite::ChangeDetection;
use serde::Deserialize;

/// Everything the binary reads from configuration. Unknown keys at any level
/// are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
  #[serde(default = "default_store_path")]
  pub store_path:       PathBuf,
  #[serde(default)]
  pub registry:         FetchSettings,
  #[serde(default)]
  pub citations:        CitationSettings,
  #[serde(default)]
  pub digest:           DigestSettings,
  #[serde(default)]
  pub scoring:          ScoringWeights,
  #[serde(default)]
  pub change_detection: ChangeDetection,
  #[serde(default)]
  pub topics:           Vec<TopicConfig>,
}

fn default_store_path() -> PathBuf { PathBuf::from("readout.sqlite3") }

impl AppConfig {
  /// Read `path` (optional) and the environment, then validate.
  ///
  /// Environment keys use `__` between levels, e.g.
  /// `READOUT__REGISTRY__THROTTLE_MS=500`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("READOUT")
          .prefix_separator("__")
          .separator("__"),
      )
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;
    Self::from_config(settings)
  }

  fn from_config(settings: config::Config) -> anyhow::Result<Self> {
    let cfg: AppConfig = settings
      .try_deserialize()
      .context("failed to deserialise configuration")?;
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
  }

  #[cfg(test)]
  pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()?;
    Self::from_config(settings)
  }

  /// Check every section; nothing touches the network before this passes.
  pub fn validate(&self) -> Result<(), ConfigError> {
    validate_topics(&self.topics)?;
    self.registry.validate()?;
    self.citations.validate()?;
    self.digest.validate()?;
    self.scoring.validate()?;
    Ok(())
  }

  /// `store_path` with a leading `~/` expanded.
  pub fn resolved_store_path(&self) -> PathBuf {
    let s = self.store_path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
      && let Ok(home) = std::env::var("HOME")
    {
      return PathBuf::from(home).join(rest);
    }
    self.store_path.clone()
  }
}
