//! Sync Orchestrator: fetch → normalise → upsert, one topic at a time.
//!
//! Each topic's pass walks a small state machine and ends with exactly one
//! [`SyncRun`] appended to the audit log. A record that fails to normalise
//! is counted and skipped; a fetch failure ends only that topic's pass. A
//! run the store refuses to record is reported as failed, never dropped.

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use chrono::Utc;
use readout_core::{
  store::TrialStore,
  sync::{RunStatus, SyncCounts, SyncRun},
  topic::{TopicConfig, validate_topics},
};
use readout_registry::{FetchSettings, PageSource, StudyCursor, normalize};
use serde::Serialize;
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::Result;

// ─── State machine ───────────────────────────────────────────────────────────

/// Where one topic's pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
  Pending,
  Fetching,
  Normalizing,
  Upserting,
  Done,
  Failed,
  Cancelled,
}

impl SyncState {
  /// Whether the pass may move from `self` to `next`.
  ///
  /// A record that fails to normalise returns the pass to `Fetching`;
  /// cancellation is only observed while waiting for the next record.
  pub fn can_advance_to(self, next: SyncState) -> bool {
    use SyncState::*;
    matches!(
      (self, next),
      (Pending, Fetching | Cancelled)
        | (Fetching, Normalizing | Done | Failed | Cancelled)
        | (Normalizing, Upserting | Fetching)
        | (Upserting, Fetching)
    )
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Done | Self::Failed | Self::Cancelled)
  }
}

struct Progress<'a> {
  topic: &'a str,
  state: SyncState,
}

impl<'a> Progress<'a> {
  fn new(topic: &'a str) -> Self { Self { topic, state: SyncState::Pending } }

  fn advance(&mut self, next: SyncState) {
    debug_assert!(
      self.state.can_advance_to(next),
      "illegal sync transition {} -> {next}",
      self.state
    );
    tracing::debug!(topic = %self.topic, from = %self.state, to = %next, "sync state");
    self.state = next;
  }
}

// ─── Cancellation ────────────────────────────────────────────────────────────

/// Shared flag that asks running syncs to stop before their next trial.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self { Self::default() }

  pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// The runs of one `sync_all` call, in topic order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
  pub runs: Vec<SyncRun>,
}

impl SyncReport {
  pub fn totals(&self) -> SyncCounts {
    let mut totals = SyncCounts::default();
    for run in &self.runs {
      totals.merge(&run.counts);
    }
    totals
  }

  pub fn failed_topics(&self) -> Vec<&str> {
    self
      .runs
      .iter()
      .filter(|r| r.is_failed())
      .map(|r| r.topic_id.as_str())
      .collect()
  }

  pub fn was_cancelled(&self) -> bool {
    self.runs.iter().any(|r| r.status == RunStatus::Cancelled)
  }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct SyncOrchestrator<S, P> {
  store:    Arc<S>,
  source:   P,
  settings: FetchSettings,
  cancel:   CancelFlag,
}

impl<S, P> SyncOrchestrator<S, P>
where
  S: TrialStore,
  P: PageSource,
{
  pub fn new(store: Arc<S>, source: P, settings: FetchSettings) -> Self {
    Self { store, source, settings, cancel: CancelFlag::new() }
  }

  pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_flag(&self) -> CancelFlag { self.cancel.clone() }

  /// Sync every topic in order.
  ///
  /// Configuration is validated before the first request. A topic whose
  /// fetch fails, or whose run cannot be recorded, gets a failed run and the
  /// next topic still runs. After a cancellation, the remaining topics are
  /// not started.
  pub async fn sync_all(&self, topics: &[TopicConfig]) -> Result<SyncReport> {
    validate_topics(topics)?;
    self.settings.validate()?;

    let mut report = SyncReport::default();
    for topic in topics {
      if self.cancel.is_cancelled() {
        tracing::info!(topic = %topic.id, "sync cancelled; topic not started");
        break;
      }
      report.runs.push(self.run_topic(topic).await);
    }

    let totals = report.totals();
    tracing::info!(
      topics = report.runs.len(),
      created = totals.created,
      updated = totals.updated,
      unchanged = totals.unchanged,
      failed = totals.failed,
      failed_topics = report.failed_topics().len(),
      "sync finished"
    );
    Ok(report)
  }

  /// One pass over one topic, recorded as a [`SyncRun`].
  ///
  /// The topic and fetch settings are validated before the first request;
  /// after that every failure is reported on the returned run.
  pub async fn sync_topic(&self, topic: &TopicConfig) -> Result<SyncRun> {
    topic.validate()?;
    self.settings.validate()?;
    Ok(self.run_topic(topic).await)
  }

  async fn run_topic(&self, topic: &TopicConfig) -> SyncRun {
    let started_at = Utc::now();
    let mut counts = SyncCounts::default();
    let mut records_seen: u32 = 0;
    let mut progress = Progress::new(&topic.id);
    let mut cursor = StudyCursor::new(&self.source, topic, &self.settings);

    tracing::info!(topic = %topic.id, "topic sync started");

    let (status, failure_reason) = if self.cancel.is_cancelled() {
      progress.advance(SyncState::Cancelled);
      (RunStatus::Cancelled, None)
    } else {
      progress.advance(SyncState::Fetching);
      loop {
        // Checkpoint: every trial before this point is fully written.
        if self.cancel.is_cancelled() {
          progress.advance(SyncState::Cancelled);
          tracing::info!(topic = %topic.id, records_seen, "topic sync cancelled");
          break (RunStatus::Cancelled, None);
        }

        let study = match cursor.next().await {
          None => {
            progress.advance(SyncState::Done);
            break (RunStatus::Completed, None);
          }
          Some(Err(err)) => {
            progress.advance(SyncState::Failed);
            tracing::error!(
              topic = %topic.id,
              status = ?err.last_status(),
              error = %err,
              "fetch failed; abandoning topic"
            );
            break (RunStatus::Failed, Some(err.to_string()));
          }
          Some(Ok(study)) => study,
        };
        records_seen += 1;

        progress.advance(SyncState::Normalizing);
        let trial = match normalize(&study) {
          Ok(trial) => trial,
          Err(err) => {
            counts.record_failure();
            tracing::warn!(
              topic = %topic.id,
              record = records_seen,
              error = %err,
              "skipping record that could not be normalised"
            );
            progress.advance(SyncState::Fetching);
            continue;
          }
        };

        progress.advance(SyncState::Upserting);
        match self.store.upsert_for_topic(&trial, &topic.id).await {
          Ok(outcome) => {
            counts.record(&outcome);
            tracing::debug!(
              topic = %topic.id,
              nct_id = %trial.nct_id,
              outcome = outcome.label(),
              "upserted trial"
            );
          }
          Err(err) => {
            counts.record_failure();
            tracing::warn!(
              topic = %topic.id,
              nct_id = %trial.nct_id,
              error = %err,
              "upsert failed"
            );
          }
        }
        progress.advance(SyncState::Fetching);
      }
    };
    debug_assert!(progress.state.is_terminal());

    let mut run = SyncRun {
      sync_run_id: Uuid::new_v4(),
      topic_id: topic.id.clone(),
      started_at,
      finished_at: Utc::now(),
      status,
      counts,
      pages_fetched: cursor.pages_fetched(),
      records_seen,
      failure_reason,
    };
    if let Err(err) = self.store.record_sync_run(&run).await {
      tracing::error!(
        topic = %topic.id,
        sync_run_id = %run.sync_run_id,
        error = %err,
        "failed to record sync run"
      );
      run.status = RunStatus::Failed;
      run.failure_reason = Some(match run.failure_reason.take() {
        Some(reason) => format!("{reason}; failed to record sync run: {err}"),
        None => format!("failed to record sync run: {err}"),
      });
    }

    tracing::info!(
      topic = %topic.id,
      status = %run.status,
      pages = run.pages_fetched,
      created = counts.created,
      updated = counts.updated,
      unchanged = counts.unchanged,
      failed = counts.failed,
      "topic sync finished"
    );
    run
  }
}

#[cfg(test)]
mod tests {
  use readout_core::{ConfigError, store::TrialStore, sync::UpsertOutcome};
  use serde_json::json;

  use super::*;
  use crate::{
    Error,
    testing::{FlakyRunLog, ScriptedSource, days_from_now, store, study, topic},
  };

  fn settings() -> FetchSettings {
    FetchSettings { throttle_ms: 0, ..FetchSettings::default() }
  }

  fn oncology_source() -> ScriptedSource {
    ScriptedSource::default().page(
      "oncology-phase3",
      "",
      vec![
        study(
          "NCT00000001",
          "Biomarker-driven Phase 3 Trial",
          Some(&days_from_now(30)),
          "INDUSTRY",
          500,
        ),
        study("NCT00000002", "Standard chemotherapy", None, "OTHER", 40),
      ],
      None,
    )
  }

  #[test]
  fn transitions() {
    use SyncState::*;
    assert!(Pending.can_advance_to(Fetching));
    assert!(Normalizing.can_advance_to(Fetching));
    assert!(Fetching.can_advance_to(Failed));
    assert!(!Upserting.can_advance_to(Cancelled));
    assert!(!Done.can_advance_to(Fetching));
    assert!(Done.is_terminal() && Cancelled.is_terminal() && !Upserting.is_terminal());
    assert_eq!(Normalizing.to_string(), "NORMALIZING");
  }

  #[tokio::test]
  async fn first_sync_creates_and_records_a_run() {
    let store = Arc::new(store().await);
    let sync = SyncOrchestrator::new(store.clone(), oncology_source(), settings());

    let report = sync.sync_all(&[topic("oncology-phase3", &["biomarker"])]).await.unwrap();
    assert_eq!(report.runs.len(), 1);
    let run = &report.runs[0];
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counts, SyncCounts { created: 2, ..SyncCounts::default() });
    assert_eq!(run.pages_fetched, 1);
    assert_eq!(run.records_seen, 2);

    let stored = store.find_by_topic("oncology-phase3").await.unwrap();
    assert_eq!(stored.len(), 2);
    let runs = store.list_sync_runs(Some("oncology-phase3"), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].sync_run_id, run.sync_run_id);
    assert_eq!(runs[0].counts, run.counts);
  }

  #[tokio::test]
  async fn resync_of_same_snapshot_is_unchanged() {
    let store = Arc::new(store().await);
    let sync = SyncOrchestrator::new(store.clone(), oncology_source(), settings());
    let topics = [topic("oncology-phase3", &[])];

    sync.sync_all(&topics).await.unwrap();
    let second = sync.sync_all(&topics).await.unwrap();
    assert_eq!(second.runs[0].counts, SyncCounts {
      unchanged: 2,
      ..SyncCounts::default()
    });
    assert_eq!(store.list_sync_runs(None, 10).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn a_changed_field_is_reported_as_updated() {
    let store = Arc::new(store().await);
    let topics = [topic("oncology-phase3", &[])];
    SyncOrchestrator::new(store.clone(), oncology_source(), settings())
      .sync_all(&topics)
      .await
      .unwrap();

    let mut flipped = study("NCT00000002", "Standard chemotherapy", None, "OTHER", 40);
    flipped["protocolSection"]["statusModule"]["overallStatus"] = json!("COMPLETED");
    let source = ScriptedSource::default().page("oncology-phase3", "", vec![flipped], None);
    let report = SyncOrchestrator::new(store.clone(), source, settings())
      .sync_all(&topics)
      .await
      .unwrap();
    assert_eq!(report.runs[0].counts.updated, 1);

    let stored = store.get_trial("NCT00000002").await.unwrap().unwrap();
    assert_eq!(stored.trial.status.to_string(), "COMPLETED");
    assert_eq!(
      store.upsert(&stored.trial).await.unwrap(),
      UpsertOutcome::Unchanged
    );
  }

  #[tokio::test]
  async fn invalid_record_is_counted_and_skipped() {
    let store = Arc::new(store().await);
    let source = ScriptedSource::default()
      .page(
        "t",
        "",
        vec![
          study("NCT1", "a", None, "INDUSTRY", 10),
          json!({ "protocolSection": { "identificationModule": { "briefTitle": "no id" } } }),
        ],
        Some("p2"),
      )
      .page("t", "p2", vec![study("NCT2", "b", None, "INDUSTRY", 10), json!("junk")], None);
    let report = SyncOrchestrator::new(store.clone(), source, settings())
      .sync_all(&[topic("t", &[])])
      .await
      .unwrap();

    let run = &report.runs[0];
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counts, SyncCounts { created: 2, failed: 2, ..SyncCounts::default() });
    assert_eq!(run.records_seen, 4);
    assert_eq!(run.pages_fetched, 2);
    assert_eq!(store.list_nct_ids(None).await.unwrap(), vec!["NCT1", "NCT2"]);
  }

  #[tokio::test]
  async fn fetch_failure_only_fails_its_topic() {
    let store = Arc::new(store().await);
    let source = ScriptedSource::default()
      .failing("broken")
      .page("healthy", "", vec![study("NCT9", "x", None, "NIH", 10)], None);
    let report = SyncOrchestrator::new(store.clone(), source, settings())
      .sync_all(&[topic("broken", &[]), topic("healthy", &[])])
      .await
      .unwrap();

    assert_eq!(report.failed_topics(), vec!["broken"]);
    let failed = &report.runs[0];
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.failure_reason.as_deref().unwrap().contains("503"));
    assert_eq!(report.runs[1].status, RunStatus::Completed);
    assert_eq!(report.runs[1].counts.created, 1);
    assert_eq!(store.list_sync_runs(Some("broken"), 5).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn unrecorded_run_fails_its_topic_and_the_next_topic_still_syncs() {
    let store = Arc::new(FlakyRunLog::refusing(&["first"]).await);
    let source = ScriptedSource::default()
      .page("first", "", vec![study("NCT1", "a", None, "INDUSTRY", 10)], None)
      .page("second", "", vec![study("NCT2", "b", None, "INDUSTRY", 10)], None);
    let report = SyncOrchestrator::new(store.clone(), source, settings())
      .sync_all(&[topic("first", &[]), topic("second", &[])])
      .await
      .unwrap();

    assert_eq!(report.runs.len(), 2);
    assert_eq!(report.failed_topics(), vec!["first"]);
    let unrecorded = &report.runs[0];
    assert_eq!(unrecorded.counts.created, 1);
    assert!(
      unrecorded
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("run log unavailable for topic first")
    );
    assert_eq!(report.runs[1].status, RunStatus::Completed);
    assert_eq!(store.list_nct_ids(None).await.unwrap(), vec!["NCT1", "NCT2"]);

    let logged = store.list_sync_runs(None, 10).await.unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].topic_id, "second");
  }

  #[tokio::test]
  async fn single_topic_sync_validates_first() {
    let store = Arc::new(store().await);
    let sync = SyncOrchestrator::new(store, ScriptedSource::default(), settings());

    let err = sync.sync_topic(&TopicConfig::new("empty")).await.unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::EmptyQuery(_))));

    let strict = SyncOrchestrator::new(
      Arc::new(crate::testing::store().await),
      ScriptedSource::default(),
      FetchSettings { page_size: 0, ..settings() },
    );
    assert!(matches!(
      strict.sync_topic(&topic("t", &[])).await.unwrap_err(),
      Error::Config(ConfigError::Invalid { .. })
    ));
    assert_eq!(sync.source.request_count(), 0);
    assert_eq!(strict.source.request_count(), 0);
  }

  #[tokio::test]
  async fn invalid_topics_fail_before_any_request() {
    let store = Arc::new(store().await);
    let source = ScriptedSource::default();
    let sync = SyncOrchestrator::new(store, source, settings());

    let err = sync.sync_all(&[topic("a", &[]), topic("a", &[])]).await.unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::DuplicateTopic(_))));
    let err = sync.sync_all(&[]).await.unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::NoTopics)));
    assert_eq!(sync.source.request_count(), 0);
  }

  #[tokio::test]
  async fn cancellation_stops_between_topics() {
    let store = Arc::new(store().await);
    let sync = SyncOrchestrator::new(store.clone(), oncology_source(), settings());
    sync.cancel_flag().cancel();

    let report = sync.sync_all(&[topic("oncology-phase3", &[])]).await.unwrap();
    assert!(report.runs.is_empty());

    let run = sync.sync_topic(&topic("oncology-phase3", &[])).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.records_seen, 0);
    assert!(store.list_nct_ids(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn cancellation_mid_topic_resumes_cleanly() {
    let store = Arc::new(store().await);
    let flag = CancelFlag::new();
    let pages = || {
      ScriptedSource::default()
        .page("t", "", vec![study("NCT1", "a", None, "INDUSTRY", 10)], Some("p2"))
        .page("t", "p2", vec![study("NCT2", "b", None, "INDUSTRY", 10)], None)
    };

    let sync = SyncOrchestrator::new(
      store.clone(),
      pages().cancelling_on(1, flag.clone()),
      settings(),
    )
    .with_cancel_flag(flag);
    let run = sync.sync_topic(&topic("t", &[])).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.counts.created, 1);
    assert_eq!(store.list_nct_ids(None).await.unwrap(), vec!["NCT1"]);

    let resumed = SyncOrchestrator::new(store.clone(), pages(), settings())
      .sync_topic(&topic("t", &[]))
      .await
      .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.counts, SyncCounts {
      created: 1,
      unchanged: 1,
      ..SyncCounts::default()
    });
  }
}
