//! Readout urgency: how soon, or how recently, primary completion falls.

use readout_core::{
  Trial,
  trial::{Certainty, DatePrecision},
};

use crate::{
  ScoreContext,
  score::{Reason, Score},
  weights::UrgencyWeights,
};

/// Score a trial's readout urgency as of `ctx.as_of`.
pub fn score_urgency(trial: &Trial, ctx: &ScoreContext, w: &UrgencyWeights) -> Score {
  let Some(date) = &trial.primary_completion_date else {
    return Score::from_contributions(
      vec![Reason::new(
        "unknown timeline: no primary completion date",
        w.unknown_timeline,
      )],
      w.cap,
    );
  };

  let days = date.days_from(ctx.as_of);
  let horizon = i64::from(w.horizon_days);
  let recent = i64::from(w.recent_days);
  let mut contributions = Vec::new();

  if (0..=horizon).contains(&days) {
    contributions.push(Reason::new(
      format!("primary completion in {days} days"),
      w.proximity * (1.0 - days as f64 / horizon as f64),
    ));
    if days <= i64::from(w.imminent_days) {
      contributions.push(Reason::new(
        format!("readout within {} days", w.imminent_days),
        w.imminent,
      ));
    }
  } else if (-recent..0).contains(&days) {
    let ago = -days;
    contributions.push(Reason::new(
      format!("primary completion {ago} days ago"),
      w.recent * (1.0 - ago as f64 / recent as f64),
    ));
    if ago > i64::from(w.no_results_after_days) && !trial.has_results {
      contributions.push(Reason::new(
        format!(
          "completed >{} days ago with no results posted",
          w.no_results_after_days
        ),
        w.no_results,
      ));
    }
    if ctx.citation_count == Some(0) {
      contributions.push(Reason::new("no linked citations found", w.no_citations));
    }
    if trial.status.is_open() {
      contributions.push(Reason::new(
        format!("status still {} after primary completion", trial.status),
        w.stale_status,
      ));
    }
  }

  // Coarse or projected dates count for less, and say so.
  let qualifier = match date.precision {
    DatePrecision::Month => Some("month-precision date"),
    DatePrecision::Year => Some("year-precision date"),
    DatePrecision::Day if date.certainty == Some(Certainty::Estimated) => {
      Some("estimated date")
    }
    DatePrecision::Day => None,
  };
  if let Some(qualifier) = qualifier {
    for r in &mut contributions {
      r.weight *= w.estimated_factor;
      r.text = format!("{} ({qualifier})", r.text);
    }
  }

  Score::from_contributions(contributions, w.cap)
}
