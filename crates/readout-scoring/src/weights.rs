//! The `[scoring]` configuration: every weight, cap, and window the engine
//! uses, with its default.

use readout_core::{
  ConfigError,
  error::ensure_weight,
  topic::InterestKeyword,
};
use serde::{Deserialize, Serialize};

/// How keywords are matched against trial text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
  /// The keyword's words must appear as consecutive whole words. `AI` does
  /// not match "trail"; `CAR-T` matches "CAR T-cell".
  #[default]
  Token,
  /// Case-insensitive substring search.
  Substring,
}

// ─── Urgency ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UrgencyWeights {
  /// Days ahead that still count as an upcoming readout.
  pub horizon_days:          u32,
  /// Weight at day 0, falling linearly to zero at `horizon_days`.
  pub proximity:             f64,
  pub imminent_days:         u32,
  pub imminent:              f64,
  /// Days back that still count as a recent readout.
  pub recent_days:           u32,
  /// Weight just after completion, falling linearly to zero at `recent_days`.
  pub recent:                f64,
  pub no_results_after_days: u32,
  pub no_results:            f64,
  pub no_citations:          f64,
  pub stale_status:          f64,
  pub unknown_timeline:      f64,
  /// Multiplier for dates that are coarse or only estimated.
  pub estimated_factor:      f64,
  pub cap:                   f64,
}

impl Default for UrgencyWeights {
  fn default() -> Self {
    Self {
      horizon_days:          180,
      proximity:             60.0,
      imminent_days:         90,
      imminent:              30.0,
      recent_days:           180,
      recent:                40.0,
      no_results_after_days: 60,
      no_results:            20.0,
      no_citations:          10.0,
      stale_status:          10.0,
      unknown_timeline:      5.0,
      estimated_factor:      0.75,
      cap:                   100.0,
    }
  }
}

impl UrgencyWeights {
  fn validate(&self) -> Result<(), ConfigError> {
    for (field, value) in [
      ("scoring.urgency.proximity", self.proximity),
      ("scoring.urgency.imminent", self.imminent),
      ("scoring.urgency.recent", self.recent),
      ("scoring.urgency.no_results", self.no_results),
      ("scoring.urgency.no_citations", self.no_citations),
      ("scoring.urgency.stale_status", self.stale_status),
      ("scoring.urgency.unknown_timeline", self.unknown_timeline),
      ("scoring.urgency.cap", self.cap),
    ] {
      ensure_weight(field, value)?;
    }
    if self.horizon_days == 0 {
      return Err(ConfigError::invalid("scoring.urgency.horizon_days", "at least 1", 0));
    }
    if self.recent_days == 0 {
      return Err(ConfigError::invalid("scoring.urgency.recent_days", "at least 1", 0));
    }
    if self.imminent_days > self.horizon_days {
      return Err(ConfigError::invalid(
        "scoring.urgency.imminent_days",
        "no larger than horizon_days",
        self.imminent_days,
      ));
    }
    if !(0.0..=1.0).contains(&self.estimated_factor) {
      return Err(ConfigError::invalid(
        "scoring.urgency.estimated_factor",
        "between 0 and 1",
        self.estimated_factor,
      ));
    }
    Ok(())
  }
}

// ─── Major ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MajorWeights {
  pub phase3_or_4:               f64,
  pub phase2:                    f64,
  pub phase1:                    f64,
  pub early_phase1:              f64,
  pub phase_cap:                 f64,
  /// Points per tenfold increase in enrollment.
  pub enrollment_per_log10:      f64,
  pub enrollment_cap:            f64,
  pub industry:                  f64,
  pub government:                f64,
  pub academic:                  f64,
  pub other_sponsor:             f64,
  pub sponsor_cap:               f64,
  pub study_type_interventional: f64,
  /// Any other declared study type (observational, expanded access, ...).
  pub study_type_other:          f64,
  pub study_type_cap:            f64,
  pub dmc:                       f64,
  pub fda_regulated:             f64,
  pub oversight_cap:             f64,
}

impl Default for MajorWeights {
  fn default() -> Self {
    Self {
      phase3_or_4:               40.0,
      phase2:                    25.0,
      phase1:                    10.0,
      early_phase1:              5.0,
      phase_cap:                 40.0,
      enrollment_per_log10:      10.0,
      enrollment_cap:            35.0,
      industry:                  20.0,
      government:                15.0,
      academic:                  10.0,
      other_sponsor:             5.0,
      sponsor_cap:               20.0,
      study_type_interventional: 8.0,
      study_type_other:          3.0,
      study_type_cap:            8.0,
      dmc:                       3.0,
      fda_regulated:             3.0,
      oversight_cap:             5.0,
    }
  }
}

impl MajorWeights {
  fn validate(&self) -> Result<(), ConfigError> {
    for (field, value) in [
      ("scoring.major.phase3_or_4", self.phase3_or_4),
      ("scoring.major.phase2", self.phase2),
      ("scoring.major.phase1", self.phase1),
      ("scoring.major.early_phase1", self.early_phase1),
      ("scoring.major.phase_cap", self.phase_cap),
      ("scoring.major.enrollment_per_log10", self.enrollment_per_log10),
      ("scoring.major.enrollment_cap", self.enrollment_cap),
      ("scoring.major.industry", self.industry),
      ("scoring.major.government", self.government),
      ("scoring.major.academic", self.academic),
      ("scoring.major.other_sponsor", self.other_sponsor),
      ("scoring.major.sponsor_cap", self.sponsor_cap),
      ("scoring.major.study_type_interventional", self.study_type_interventional),
      ("scoring.major.study_type_other", self.study_type_other),
      ("scoring.major.study_type_cap", self.study_type_cap),
      ("scoring.major.dmc", self.dmc),
      ("scoring.major.fda_regulated", self.fda_regulated),
      ("scoring.major.oversight_cap", self.oversight_cap),
    ] {
      ensure_weight(field, value)?;
    }
    Ok(())
  }
}

// ─── Interest ────────────────────────────────────────────────────────────────

fn default_signal_terms() -> Vec<InterestKeyword> {
  [
    ("first-in-human", 6.0),
    ("randomized", 4.0),
    ("double-blind", 4.0),
    ("platform", 4.0),
    ("adaptive", 4.0),
    ("pragmatic", 3.0),
    ("mRNA", 8.0),
    ("CRISPR", 8.0),
    ("gene therapy", 8.0),
    ("cell therapy", 7.0),
    ("CAR-T", 7.0),
    ("ADC", 7.0),
    ("bispecific", 6.0),
    ("AI", 5.0),
  ]
  .into_iter()
  .map(|(kw, w)| InterestKeyword::weighted(kw, w))
  .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterestWeights {
  /// Weight of a topic keyword that does not carry its own.
  pub default_keyword_weight: f64,
  pub match_mode:             MatchMode,
  /// Topic-independent terms; a term without a weight uses
  /// `default_keyword_weight`.
  pub signal_terms:           Vec<InterestKeyword>,
  pub cap:                    f64,
}

impl Default for InterestWeights {
  fn default() -> Self {
    Self {
      default_keyword_weight: 10.0,
      match_mode:             MatchMode::Token,
      signal_terms:           default_signal_terms(),
      cap:                    100.0,
    }
  }
}

impl InterestWeights {
  fn validate(&self) -> Result<(), ConfigError> {
    ensure_weight("scoring.interest.default_keyword_weight", self.default_keyword_weight)?;
    ensure_weight("scoring.interest.cap", self.cap)?;
    for term in &self.signal_terms {
      if term.keyword.trim().is_empty() {
        return Err(ConfigError::invalid(
          "scoring.interest.signal_terms",
          "non-empty terms",
          "\"\"",
        ));
      }
      if let Some(weight) = term.weight {
        ensure_weight(&format!("scoring.interest.signal_terms.{}", term.keyword), weight)?;
      }
    }
    Ok(())
  }
}

// ─── Composite ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositeWeights {
  pub urgency:  f64,
  pub major:    f64,
  pub interest: f64,
}

impl Default for CompositeWeights {
  fn default() -> Self { Self { urgency: 0.4, major: 0.4, interest: 0.2 } }
}

// ─── ScoringWeights ──────────────────────────────────────────────────────────

/// Everything the scoring engine is parameterised by.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringWeights {
  pub urgency:   UrgencyWeights,
  pub major:     MajorWeights,
  pub interest:  InterestWeights,
  pub composite: CompositeWeights,
}

impl ScoringWeights {
  pub fn validate(&self) -> Result<(), ConfigError> {
    self.urgency.validate()?;
    self.major.validate()?;
    self.interest.validate()?;
    ensure_weight("scoring.composite.urgency", self.composite.urgency)?;
    ensure_weight("scoring.composite.major", self.composite.major)?;
    ensure_weight("scoring.composite.interest", self.composite.interest)?;
    Ok(())
  }
}
