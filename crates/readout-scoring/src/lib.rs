//! Deterministic, explainable trial scoring.
//!
//! Three independent scores (readout urgency, major-trial likelihood, and
//! interestingness), each a capped sum of weighted rules with one reason per
//! contributing rule. Nothing here performs I/O: the same trial, keywords,
//! weights, and `as_of` date always give the same scores and the same
//! reason order.

pub mod interest;
pub mod major;
pub mod rank;
pub mod score;
pub mod urgency;
pub mod weights;

use chrono::NaiveDate;
use readout_core::{
  ConfigError, Trial,
  topic::{InterestKeyword, TopicConfig},
};
use serde::{Deserialize, Serialize};

pub use rank::{RankingPolicy, ScoreKind};
pub use score::{Reason, Score};
pub use weights::{
  CompositeWeights, InterestWeights, MajorWeights, MatchMode, ScoringWeights,
  UrgencyWeights,
};

/// Inputs to urgency scoring that do not live on the trial itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreContext {
  /// The day the digest is built for; all day offsets count from here.
  pub as_of:          NaiveDate,
  /// Linked citations, or `None` when the trial was never looked up.
  pub citation_count: Option<usize>,
}

impl ScoreContext {
  pub fn new(as_of: NaiveDate) -> Self { Self { as_of, citation_count: None } }
}

/// The three scores of one trial plus their weighted composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialScores {
  pub urgency:   Score,
  pub major:     Score,
  pub interest:  Score,
  pub composite: f64,
}

impl TrialScores {
  pub fn get(&self, kind: ScoreKind) -> f64 {
    match kind {
      ScoreKind::Urgency => self.urgency.value,
      ScoreKind::Major => self.major.value,
      ScoreKind::Interest => self.interest.value,
      ScoreKind::Composite => self.composite,
    }
  }
}

/// The scoring functions bound to one validated weight configuration.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
  weights: ScoringWeights,
}

impl ScoringEngine {
  pub fn new(weights: ScoringWeights) -> Result<Self, ConfigError> {
    weights.validate()?;
    Ok(Self { weights })
  }

  pub fn weights(&self) -> &ScoringWeights { &self.weights }

  pub fn urgency(&self, trial: &Trial, ctx: &ScoreContext) -> Score {
    urgency::score_urgency(trial, ctx, &self.weights.urgency)
  }

  pub fn major(&self, trial: &Trial) -> Score {
    major::score_major(trial, &self.weights.major)
  }

  pub fn interest(&self, trial: &Trial, keywords: &[InterestKeyword]) -> Score {
    interest::score_interest(trial, keywords, &self.weights.interest)
  }

  pub fn interest_for_topic(&self, trial: &Trial, topic: &TopicConfig) -> Score {
    self.interest(trial, &topic.interesting_keywords)
  }

  /// Merged keywords of `topics`, with this engine's default weight applied.
  pub fn union_keywords<'a>(
    &self,
    topics: impl IntoIterator<Item = &'a TopicConfig>,
  ) -> Vec<InterestKeyword> {
    interest::union_keywords(topics, self.weights.interest.default_keyword_weight)
  }

  /// All three scores and the composite.
  pub fn score(
    &self,
    trial: &Trial,
    keywords: &[InterestKeyword],
    ctx: &ScoreContext,
  ) -> TrialScores {
    let urgency = self.urgency(trial, ctx);
    let major = self.major(trial);
    let interest = self.interest(trial, keywords);
    let c = &self.weights.composite;
    let composite = score::round2(
      c.urgency * urgency.value + c.major * major.value + c.interest * interest.value,
    );
    TrialScores { urgency, major, interest, composite }
  }
}

impl Default for ScoringEngine {
  fn default() -> Self { Self { weights: ScoringWeights::default() } }
}
