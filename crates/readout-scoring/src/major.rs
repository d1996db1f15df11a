//! Major-trial likelihood: phase, enrollment, sponsor, study type, and
//! oversight, each capped on its own and then summed.

use readout_core::{
  Trial,
  trial::{Phase, SponsorClass},
};

use crate::{
  score::{Reason, Score, cap_factor},
  weights::MajorWeights,
};

fn phase_factor(trial: &Trial, w: &MajorWeights) -> Vec<Reason> {
  let weight = match trial.phase {
    Phase::Phase3 | Phase::Phase4 => w.phase3_or_4,
    Phase::Phase2 => w.phase2,
    Phase::Phase1 => w.phase1,
    Phase::EarlyPhase1 => w.early_phase1,
    Phase::NotApplicable | Phase::Unknown => 0.0,
  };
  vec![Reason::new(format!("{} trial", trial.phase.label()), weight)]
}

fn enrollment_factor(trial: &Trial, w: &MajorWeights) -> Vec<Reason> {
  let Some(enrollment) = trial.enrollment.filter(|e| e.count > 0) else {
    return Vec::new();
  };
  let estimated = if enrollment.is_estimated() { ", estimated" } else { "" };
  vec![Reason::new(
    format!("enrollment of {} participants{estimated}", enrollment.count),
    w.enrollment_per_log10 * f64::from(enrollment.count).log10(),
  )]
}

fn sponsor_factor(trial: &Trial, w: &MajorWeights) -> Vec<Reason> {
  let weight = match trial.sponsor_class {
    SponsorClass::Industry => w.industry,
    SponsorClass::Government => w.government,
    SponsorClass::Academic => w.academic,
    SponsorClass::Other => w.other_sponsor,
    SponsorClass::Unknown => 0.0,
  };
  vec![Reason::new(format!("{} sponsor", trial.sponsor_class), weight)]
}

fn study_type_factor(trial: &Trial, w: &MajorWeights) -> Vec<Reason> {
  let Some(study_type) = trial.study_type.as_deref().map(str::trim).filter(|s| !s.is_empty())
  else {
    return Vec::new();
  };
  let weight = if study_type.eq_ignore_ascii_case("INTERVENTIONAL") {
    w.study_type_interventional
  } else {
    w.study_type_other
  };
  let label = study_type.to_ascii_lowercase().replace('_', " ");
  vec![Reason::new(format!("{label} study"), weight)]
}

fn oversight_factor(trial: &Trial, w: &MajorWeights) -> Vec<Reason> {
  let mut reasons = Vec::new();
  if trial.oversight.has_dmc == Some(true) {
    reasons.push(Reason::new("data monitoring committee", w.dmc));
  }
  if trial.oversight.fda_regulated() {
    reasons.push(Reason::new("FDA-regulated product", w.fda_regulated));
  }
  reasons
}

/// Score how likely a trial is to be a major one.
pub fn score_major(trial: &Trial, w: &MajorWeights) -> Score {
  let mut contributions = cap_factor(phase_factor(trial, w), w.phase_cap);
  contributions.extend(cap_factor(enrollment_factor(trial, w), w.enrollment_cap));
  contributions.extend(cap_factor(sponsor_factor(trial, w), w.sponsor_cap));
  contributions.extend(cap_factor(study_type_factor(trial, w), w.study_type_cap));
  contributions.extend(cap_factor(oversight_factor(trial, w), w.oversight_cap));

  // Factors are already capped; the sum is not capped again.
  Score::from_contributions(contributions, f64::INFINITY)
}
