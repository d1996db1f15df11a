//! Digest Builder: select trials around their readout, score, and rank.
//!
//! Read-only over the store. The order of the result is fully determined by
//! the [`RankingPolicy`], which always ends with `nct_id` ascending.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use readout_core::{
  ConfigError,
  store::{TrackedTrial, TrialStore},
  topic::{TopicConfig, select_topics, validate_topics},
  trial::TrialStatus,
};
use readout_scoring::{RankingPolicy, ScoreContext, ScoringEngine, TrialScores};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Settings ────────────────────────────────────────────────────────────────

/// The `[digest]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigestSettings {
  /// Upcoming readouts up to this many days ahead are included.
  pub days_ahead:              u32,
  /// Readouts up to this many days in the past are included.
  pub recently_completed_days: u32,
  /// Only these statuses; empty means any status.
  pub statuses:                Vec<TrialStatus>,
  /// Also list trials that have no primary completion date.
  pub include_undated:         bool,
  pub limit:                   Option<usize>,
  pub ranking:                 RankingPolicy,
}

impl Default for DigestSettings {
  fn default() -> Self {
    Self {
      days_ahead:              180,
      recently_completed_days: 120,
      statuses:                Vec::new(),
      include_undated:         true,
      limit:                   None,
      ranking:                 RankingPolicy::default(),
    }
  }
}

impl DigestSettings {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.limit == Some(0) {
      return Err(ConfigError::invalid("digest.limit", "at least 1", 0));
    }
    Ok(())
  }

  /// Inclusive readout window around `as_of`.
  pub fn window(&self, as_of: NaiveDate, days_ahead: u32) -> (NaiveDate, NaiveDate) {
    let start = as_of
      .checked_sub_days(Days::new(u64::from(self.recently_completed_days)))
      .unwrap_or(NaiveDate::MIN);
    let end = as_of
      .checked_add_days(Days::new(u64::from(days_ahead)))
      .unwrap_or(NaiveDate::MAX);
    (start, end)
  }
}

// ─── Query / result ──────────────────────────────────────────────────────────

/// Per-invocation overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestQuery {
  /// Replaces [`DigestSettings::days_ahead`] when set.
  pub days_ahead: Option<u32>,
  /// Restrict to trials associated with these topics; empty means all.
  pub topics:     Vec<String>,
}

/// One ranked row for a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
  pub tracked:         TrackedTrial,
  pub scores:          TrialScores,
  /// Signed days from the digest date to primary completion.
  pub days_to_readout: Option<i64>,
}

impl DigestEntry {
  pub fn nct_id(&self) -> &str { &self.tracked.trial.nct_id }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

pub struct DigestBuilder<S> {
  store:    Arc<S>,
  engine:   ScoringEngine,
  topics:   Vec<TopicConfig>,
  settings: DigestSettings,
}

impl<S: TrialStore> DigestBuilder<S> {
  pub fn new(
    store: Arc<S>,
    engine: ScoringEngine,
    topics: Vec<TopicConfig>,
    settings: DigestSettings,
  ) -> Result<Self> {
    validate_topics(&topics)?;
    settings.validate()?;
    Ok(Self { store, engine, topics, settings })
  }

  pub fn settings(&self) -> &DigestSettings { &self.settings }

  /// Ranked entries for the digest dated `as_of`.
  pub async fn build(&self, query: &DigestQuery, as_of: NaiveDate) -> Result<Vec<DigestEntry>> {
    let selected = select_topics(&self.topics, &query.topics)?;
    let days_ahead = query.days_ahead.unwrap_or(self.settings.days_ahead);
    let (start, end) = self.settings.window(as_of, days_ahead);
    let statuses = &self.settings.statuses;

    let mut candidates = self
      .store
      .find_by_readout_window(start, end, statuses)
      .await
      .map_err(Error::store)?;
    if self.settings.include_undated {
      candidates.extend(
        self
          .store
          .find_without_completion_date(statuses)
          .await
          .map_err(Error::store)?,
      );
    }
    if !query.topics.is_empty() {
      candidates.retain(|t| selected.iter().any(|topic| t.topics.contains(&topic.id)));
    }

    let mut entries: Vec<DigestEntry> =
      candidates.into_iter().map(|t| self.score(t, as_of)).collect();
    entries.sort_by(|a, b| {
      self
        .settings
        .ranking
        .compare((&a.scores, a.nct_id()), (&b.scores, b.nct_id()))
    });
    if let Some(limit) = self.settings.limit {
      entries.truncate(limit);
    }

    tracing::info!(
      %start,
      %end,
      entries = entries.len(),
      "digest built"
    );
    Ok(entries)
  }

  fn score(&self, tracked: TrackedTrial, as_of: NaiveDate) -> DigestEntry {
    let keywords = self.engine.union_keywords(
      self
        .topics
        .iter()
        .filter(|topic| tracked.topics.contains(&topic.id)),
    );
    let ctx = ScoreContext { as_of, citation_count: tracked.known_citation_count() };
    let scores = self.engine.score(&tracked.trial, &keywords, &ctx);
    let days_to_readout = tracked
      .trial
      .primary_completion_date
      .as_ref()
      .map(|d| d.days_from(as_of));
    DigestEntry { tracked, scores, days_to_readout }
  }
}
