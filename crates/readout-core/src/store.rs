//! The `TrialStore` trait and the stored view of a trial.
//!
//! The trait is implemented by storage backends (e.g. `readout-store-sqlite`).
//! The sync orchestrator and digest builder depend on this abstraction, not
//! on any concrete backend.

use std::{collections::BTreeSet, future::Future};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  citation::Citation,
  sync::{SyncRun, UpsertOutcome},
  trial::{Trial, TrialStatus},
};

// ─── Read model ──────────────────────────────────────────────────────────────

/// A trial as the store holds it: the latest snapshot plus its associations
/// and bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTrial {
  pub trial:                Trial,
  /// Every topic this trial has matched; only grows unless pruned.
  pub topics:               BTreeSet<String>,
  pub citations:            Vec<Citation>,
  pub first_seen_at:        DateTime<Utc>,
  pub last_synced_at:       DateTime<Utc>,
  /// Last time an upsert classified the trial as created or updated.
  pub last_changed_at:      DateTime<Utc>,
  /// When the citation linker last looked this trial up; `None` if never.
  pub citations_checked_at: Option<DateTime<Utc>>,
}

impl TrackedTrial {
  /// Number of linked citations, or `None` when nobody has looked yet.
  pub fn known_citation_count(&self) -> Option<usize> {
    self.citations_checked_at.map(|_| self.citations.len())
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a trial store backend.
///
/// Trials are never deleted. Every write that touches one trial (snapshot
/// plus topic association) happens in a single transaction, and concurrent
/// writers to the same `nct_id` serialise at that transaction.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait TrialStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Trials ──────────────────────────────────────────────────────────────

  /// Insert or update `trial`, classifying the write as created, updated, or
  /// unchanged by comparing the stored snapshot field by field (volatile
  /// fields excluded). The stored snapshot always becomes `trial`.
  fn upsert<'a>(
    &'a self,
    trial: &'a Trial,
  ) -> impl Future<Output = Result<UpsertOutcome, Self::Error>> + Send + 'a;

  /// [`upsert`](Self::upsert) and [`associate_topic`](Self::associate_topic)
  /// as one atomic write.
  fn upsert_for_topic<'a>(
    &'a self,
    trial: &'a Trial,
    topic_id: &'a str,
  ) -> impl Future<Output = Result<UpsertOutcome, Self::Error>> + Send + 'a;

  /// Retrieve one trial. Returns `None` if the `nct_id` was never stored.
  fn get_trial<'a>(
    &'a self,
    nct_id: &'a str,
  ) -> impl Future<Output = Result<Option<TrackedTrial>, Self::Error>> + Send + 'a;

  /// Identifiers of stored trials in `nct_id` order, optionally limited.
  fn list_nct_ids(
    &self,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  // ── Topic associations ──────────────────────────────────────────────────

  /// Record that `nct_id` matched `topic_id`. Idempotent; returns `true` when
  /// the association is new. Errors if the trial does not exist.
  fn associate_topic<'a>(
    &'a self,
    nct_id: &'a str,
    topic_id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Drop associations of `topic_id` with trials not in `retain`. The only
  /// way associations ever shrink; sync never calls it. Returns the number
  /// of associations removed.
  fn prune_topic<'a>(
    &'a self,
    topic_id: &'a str,
    retain: &'a BTreeSet<String>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  // ── Queries ─────────────────────────────────────────────────────────────

  /// Trials whose primary completion date falls in `start..=end`, restricted
  /// to `statuses` unless that slice is empty.
  fn find_by_readout_window<'a>(
    &'a self,
    start: NaiveDate,
    end: NaiveDate,
    statuses: &'a [TrialStatus],
  ) -> impl Future<Output = Result<Vec<TrackedTrial>, Self::Error>> + Send + 'a;

  /// Trials with no primary completion date at all, with the same status
  /// filter semantics as [`find_by_readout_window`](Self::find_by_readout_window).
  fn find_without_completion_date<'a>(
    &'a self,
    statuses: &'a [TrialStatus],
  ) -> impl Future<Output = Result<Vec<TrackedTrial>, Self::Error>> + Send + 'a;

  /// Every trial ever associated with `topic_id`.
  fn find_by_topic<'a>(
    &'a self,
    topic_id: &'a str,
  ) -> impl Future<Output = Result<Vec<TrackedTrial>, Self::Error>> + Send + 'a;

  // ── Sync audit ──────────────────────────────────────────────────────────

  /// Append a finished run to the audit log.
  fn record_sync_run<'a>(
    &'a self,
    run: &'a SyncRun,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Most recent runs first, optionally for one topic.
  fn list_sync_runs<'a>(
    &'a self,
    topic_id: Option<&'a str>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<SyncRun>, Self::Error>> + Send + 'a;

  // ── Citations ───────────────────────────────────────────────────────────

  /// Upsert `citations` for a stored trial and mark it as checked, even when
  /// the slice is empty. Returns how many citations were written.
  fn attach_citations<'a>(
    &'a self,
    nct_id: &'a str,
    citations: &'a [Citation],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;
}
