//! Citation enrichment: a post-sync pass that attaches publications to
//! stored trials.

use chrono::NaiveDate;
use readout_core::store::{TrackedTrial, TrialStore};
use readout_registry::{CitationSettings, CitationSource};
use serde::Serialize;

use crate::{DigestSettings, Error, Result};

/// Tallies of one linking pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
  /// Trials looked up successfully, with or without results.
  pub checked:        usize,
  pub with_citations: usize,
  pub citations:      usize,
  /// Lookups or writes that failed; those trials stay unchecked.
  pub failed:         usize,
}

/// Look up citations for up to `max_trials` trials (default
/// `settings.max_trials_per_run`) and store them.
///
/// With `actionable_only`, candidates are the trials inside the digest's
/// readout window; otherwise every stored trial. Never-checked trials go
/// first, then the least recently checked. A failed lookup is logged and
/// skipped. Does nothing when linking is disabled.
pub async fn link_citations<S, C>(
  store: &S,
  source: &C,
  settings: &CitationSettings,
  digest: &DigestSettings,
  as_of: NaiveDate,
  max_trials: Option<usize>,
) -> Result<LinkReport>
where
  S: TrialStore,
  C: CitationSource,
{
  if !settings.enabled {
    tracing::info!("citation linking disabled");
    return Ok(LinkReport::default());
  }
  settings.validate()?;

  let limit = max_trials.unwrap_or(settings.max_trials_per_run);
  let mut candidates = candidates(store, settings, digest, as_of).await?;
  candidates.sort_by(|a, b| {
    a
      .citations_checked_at
      .cmp(&b.citations_checked_at)
      .then_with(|| a.trial.nct_id.cmp(&b.trial.nct_id))
  });
  candidates.truncate(limit);
  tracing::info!(trials = candidates.len(), limit, "linking citations");

  let mut budget = settings.rate_budget();
  let mut report = LinkReport::default();
  for tracked in &candidates {
    let nct_id = tracked.trial.nct_id.as_str();
    let citations = match source.citations_for(nct_id, &mut budget).await {
      Ok(citations) => citations,
      Err(err) => {
        report.failed += 1;
        tracing::warn!(nct_id, error = %err, "citation lookup failed");
        continue;
      }
    };
    match store.attach_citations(nct_id, &citations).await {
      Ok(written) => {
        report.checked += 1;
        report.citations += written;
        if written > 0 {
          report.with_citations += 1;
        }
        tracing::debug!(nct_id, citations = written, "citations attached");
      }
      Err(err) => {
        report.failed += 1;
        tracing::warn!(nct_id, error = %err, "storing citations failed");
      }
    }
  }

  tracing::info!(
    checked = report.checked,
    with_citations = report.with_citations,
    citations = report.citations,
    failed = report.failed,
    "citation linking finished"
  );
  Ok(report)
}

async fn candidates<S: TrialStore>(
  store: &S,
  settings: &CitationSettings,
  digest: &DigestSettings,
  as_of: NaiveDate,
) -> Result<Vec<TrackedTrial>> {
  if settings.actionable_only {
    let (start, end) = digest.window(as_of, digest.days_ahead);
    return store
      .find_by_readout_window(start, end, &[])
      .await
      .map_err(Error::store);
  }
  let ids = store.list_nct_ids(None).await.map_err(Error::store)?;
  let mut all = Vec::with_capacity(ids.len());
  for nct_id in &ids {
    if let Some(tracked) = store.get_trial(nct_id).await.map_err(Error::store)? {
      all.push(tracked);
    }
  }
  Ok(all)
}
