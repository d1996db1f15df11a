//! Scores and their reasons.

use serde::{Deserialize, Serialize};

/// One rule's contribution to a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
  pub text:   String,
  pub weight: f64,
}

impl Reason {
  pub fn new(text: impl Into<String>, weight: f64) -> Self {
    Self { text: text.into(), weight }
  }
}

/// A score plus the reasons that add up to it.
///
/// Reasons are ordered by weight, largest first; equal weights keep the
/// order in which the rules are defined. Every reason has a positive weight,
/// so a zero score always has an empty reason list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Score {
  pub value:   f64,
  pub reasons: Vec<Reason>,
}

impl Score {
  pub fn zero() -> Self { Self::default() }

  /// Sum `contributions` (in rule-definition order) into a score capped at
  /// `cap`. Weights are rounded to two decimals first; anything that rounds
  /// to zero or below is dropped.
  pub fn from_contributions(contributions: Vec<Reason>, cap: f64) -> Self {
    let mut reasons: Vec<Reason> = contributions
      .into_iter()
      .map(|r| Reason { weight: round2(r.weight), ..r })
      .filter(|r| r.weight > 0.0)
      .collect();
    // `sort_by` is stable, which keeps definition order among ties.
    reasons.sort_by(|a, b| b.weight.total_cmp(&a.weight));

    let total: f64 = reasons.iter().map(|r| r.weight).sum();
    Self { value: round2(total.min(cap)), reasons }
  }

  pub fn reason_texts(&self) -> Vec<&str> {
    self.reasons.iter().map(|r| r.text.as_str()).collect()
  }

  pub fn is_zero(&self) -> bool { self.value == 0.0 }
}

pub(crate) fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }

/// Scale a factor's contributions down so they sum to at most `cap`,
/// keeping their proportions.
pub(crate) fn cap_factor(mut contributions: Vec<Reason>, cap: f64) -> Vec<Reason> {
  let total: f64 = contributions.iter().map(|r| r.weight).sum();
  if total > cap && total > 0.0 {
    let scale = cap / total;
    for r in &mut contributions {
      r.weight *= scale;
    }
  }
  contributions
}
