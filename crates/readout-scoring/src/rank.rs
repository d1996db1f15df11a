//! Ranking order over scored trials.

use std::cmp::Ordering;

use readout_core::ConfigError;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::TrialScores;

/// Which score a ranking key reads.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ScoreKind {
  Urgency,
  Major,
  Interest,
  Composite,
}

/// Score precedence for ordering a digest: compare by the first kind
/// (descending), break ties with the next, and finally by `nct_id`
/// ascending so the order is total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ScoreKind>", into = "Vec<ScoreKind>")]
pub struct RankingPolicy(Vec<ScoreKind>);

impl RankingPolicy {
  pub fn new(order: Vec<ScoreKind>) -> Result<Self, ConfigError> {
    if order.is_empty() {
      return Err(ConfigError::invalid("digest.ranking", "at least one score", "[]"));
    }
    for (i, kind) in order.iter().enumerate() {
      if order[..i].contains(kind) {
        return Err(ConfigError::invalid(
          "digest.ranking",
          "each score at most once",
          kind,
        ));
      }
    }
    Ok(Self(order))
  }

  pub fn order(&self) -> &[ScoreKind] { &self.0 }

  pub fn compare(
    &self,
    (a, a_id): (&TrialScores, &str),
    (b, b_id): (&TrialScores, &str),
  ) -> Ordering {
    self
      .0
      .iter()
      .map(|kind| b.get(*kind).total_cmp(&a.get(*kind)))
      .find(|o| o.is_ne())
      .unwrap_or_else(|| a_id.cmp(b_id))
  }
}

impl Default for RankingPolicy {
  fn default() -> Self {
    Self(vec![ScoreKind::Urgency, ScoreKind::Major, ScoreKind::Interest])
  }
}

impl TryFrom<Vec<ScoreKind>> for RankingPolicy {
  type Error = ConfigError;

  fn try_from(order: Vec<ScoreKind>) -> Result<Self, Self::Error> { Self::new(order) }
}

impl From<RankingPolicy> for Vec<ScoreKind> {
  fn from(policy: RankingPolicy) -> Self { policy.0 }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::score::Score;

  fn scores(urgency: f64, major: f64, interest: f64) -> TrialScores {
    let s = |value| Score { value, reasons: Vec::new() };
    TrialScores {
      urgency:   s(urgency),
      major:     s(major),
      interest:  s(interest),
      composite: 0.0,
    }
  }

  #[test]
  fn default_precedence_is_urgency_major_interest_id() {
    let policy = RankingPolicy::default();
    let mut rows = vec![
      ("NCT4", scores(10.0, 50.0, 0.0)),
      ("NCT3", scores(80.0, 10.0, 0.0)),
      ("NCT2", scores(10.0, 50.0, 5.0)),
      ("NCT1", scores(10.0, 50.0, 5.0)),
    ];
    rows.sort_by(|(a_id, a), (b_id, b)| policy.compare((a, a_id), (b, b_id)));
    let ids: Vec<&str> = rows.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec!["NCT3", "NCT1", "NCT2", "NCT4"]);
  }

  #[test]
  fn custom_order_changes_ranking() {
    let policy = RankingPolicy::new(vec![ScoreKind::Major]).unwrap();
    let a = scores(90.0, 10.0, 0.0);
    let b = scores(10.0, 90.0, 0.0);
    assert_eq!(policy.compare((&a, "A"), (&b, "B")), Ordering::Greater);
  }

  #[test]
  fn invalid_orders_are_rejected() {
    assert!(RankingPolicy::new(Vec::new()).is_err());
    assert!(RankingPolicy::new(vec![ScoreKind::Major, ScoreKind::Major]).is_err());
    let parsed: Result<RankingPolicy, _> = serde_json::from_str(r#"["urgency", "urgency"]"#);
    assert!(parsed.is_err());
    let parsed: RankingPolicy =
      serde_json::from_str(r#"["composite", "urgency"]"#).unwrap();
    assert_eq!(parsed.order(), &[ScoreKind::Composite, ScoreKind::Urgency]);
  }

  #[test]
  fn score_kind_parses_case_insensitively() {
    assert_eq!("Urgency".parse::<ScoreKind>().unwrap(), ScoreKind::Urgency);
    assert_eq!(ScoreKind::Composite.to_string(), "composite");
  }
}
