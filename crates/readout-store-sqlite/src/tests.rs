//! Integration tests for `SqliteStore` against an in-memory database.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, Utc};
use readout_core::{
  Trial,
  citation::Citation,
  store::TrialStore,
  sync::{RunStatus, SyncCounts, SyncRun, UpsertOutcome},
  trial::{PartialDate, Phase, TrialStatus},
};
use uuid::Uuid;

use crate::{ChangeDetection, Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn date(s: &str) -> NaiveDate { s.parse().unwrap() }

fn trial(nct_id: &str, completion: Option<&str>, status: TrialStatus) -> Trial {
  let mut t = Trial::new(nct_id, format!("Study {nct_id}"));
  t.phase = Phase::Phase3;
  t.status = status;
  t.primary_completion_date = completion.and_then(PartialDate::parse);
  t
}

// ─── Upsert classification ───────────────────────────────────────────────────

#[tokio::test]
async fn first_upsert_creates_then_repeat_is_unchanged() {
  let s = store().await;
  let t = trial("NCT00000001", Some("2025-06-01"), TrialStatus::Recruiting);

  assert_eq!(s.upsert(&t).await.unwrap(), UpsertOutcome::Created);
  assert_eq!(s.upsert(&t).await.unwrap(), UpsertOutcome::Unchanged);
  assert_eq!(s.upsert(&t).await.unwrap(), UpsertOutcome::Unchanged);

  let stored = s.get_trial("NCT00000001").await.unwrap().unwrap();
  assert_eq!(stored.trial, t);
  assert_eq!(stored.first_seen_at, stored.last_changed_at);
  assert!(stored.last_synced_at >= stored.first_seen_at);
}

#[tokio::test]
async fn single_field_change_is_an_update() {
  let s = store().await;
  let mut t = trial("NCT00000002", Some("2025-06-01"), TrialStatus::Recruiting);
  s.upsert(&t).await.unwrap();
  let before = s.get_trial("NCT00000002").await.unwrap().unwrap();

  t.status = TrialStatus::ActiveNotRecruiting;
  assert_eq!(s.upsert(&t).await.unwrap(), UpsertOutcome::Updated {
    changed_fields: vec!["status".into()],
  });

  let after = s.get_trial("NCT00000002").await.unwrap().unwrap();
  assert_eq!(after.trial.status, TrialStatus::ActiveNotRecruiting);
  assert_eq!(after.first_seen_at, before.first_seen_at);
  assert!(after.last_changed_at >= before.last_changed_at);
}

#[tokio::test]
async fn volatile_fields_do_not_count_as_changes() {
  let s = store().await.with_change_detection(ChangeDetection {
    volatile_fields: vec!["last_update_posted".into()],
  });
  let mut t = trial("NCT00000003", Some("2025-06-01"), TrialStatus::Recruiting);
  t.last_update_posted = PartialDate::parse("2024-01-01");
  s.upsert(&t).await.unwrap();
  let before = s.get_trial("NCT00000003").await.unwrap().unwrap();

  t.last_update_posted = PartialDate::parse("2024-03-01");
  assert_eq!(s.upsert(&t).await.unwrap(), UpsertOutcome::Unchanged);

  // The newest snapshot is still what the store holds.
  let after = s.get_trial("NCT00000003").await.unwrap().unwrap();
  assert_eq!(after.trial.last_update_posted, t.last_update_posted);
  assert_eq!(after.last_changed_at, before.last_changed_at);
}

#[tokio::test]
async fn concurrent_upserts_of_one_trial_create_it_once() {
  let s = store().await;
  let t = trial("NCT00000004", None, TrialStatus::Recruiting);

  let (a, b) = tokio::join!(s.upsert(&t), s.upsert(&t));
  let mut outcomes = vec![a.unwrap(), b.unwrap()];
  outcomes.sort_by_key(|o| o.label());
  assert_eq!(outcomes, vec![UpsertOutcome::Created, UpsertOutcome::Unchanged]);
}

// ─── Topic associations ──────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_for_topic_associates_additively() {
  let s = store().await;
  let t = trial("NCT00000010", None, TrialStatus::Recruiting);

  s.upsert_for_topic(&t, "oncology").await.unwrap();
  s.upsert_for_topic(&t, "oncology").await.unwrap();
  s.upsert_for_topic(&t, "cardio").await.unwrap();

  let stored = s.get_trial("NCT00000010").await.unwrap().unwrap();
  assert_eq!(
    stored.topics,
    BTreeSet::from(["cardio".to_owned(), "oncology".to_owned()])
  );
}

#[tokio::test]
async fn associate_topic_is_idempotent() {
  let s = store().await;
  s.upsert(&trial("NCT00000011", None, TrialStatus::Recruiting))
    .await
    .unwrap();

  assert!(s.associate_topic("NCT00000011", "oncology").await.unwrap());
  assert!(!s.associate_topic("NCT00000011", "oncology").await.unwrap());
  assert_eq!(s.find_by_topic("oncology").await.unwrap().len(), 1);
}

#[tokio::test]
async fn associate_topic_requires_existing_trial() {
  let s = store().await;
  let err = s.associate_topic("NCT99999999", "oncology").await.unwrap_err();
  assert!(matches!(err, Error::TrialNotFound(id) if id == "NCT99999999"));
}

#[tokio::test]
async fn prune_topic_removes_only_unretained_associations() {
  let s = store().await;
  for id in ["NCT00000020", "NCT00000021", "NCT00000022"] {
    s.upsert_for_topic(&trial(id, None, TrialStatus::Recruiting), "oncology")
      .await
      .unwrap();
  }
  s.associate_topic("NCT00000022", "cardio").await.unwrap();

  let retain = BTreeSet::from(["NCT00000020".to_owned()]);
  assert_eq!(s.prune_topic("oncology", &retain).await.unwrap(), 2);

  let left: Vec<String> = s
    .find_by_topic("oncology")
    .await
    .unwrap()
    .into_iter()
    .map(|t| t.trial.nct_id)
    .collect();
  assert_eq!(left, vec!["NCT00000020"]);

  // Trials survive pruning, and so do their other associations.
  assert!(s.get_trial("NCT00000021").await.unwrap().is_some());
  assert_eq!(s.find_by_topic("cardio").await.unwrap().len(), 1);
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn readout_window_is_inclusive_and_ordered() {
  let s = store().await;
  s.upsert(&trial("NCT00000032", Some("2025-03-31"), TrialStatus::Recruiting))
    .await
    .unwrap();
  s.upsert(&trial("NCT00000031", Some("2025-01-01"), TrialStatus::Completed))
    .await
    .unwrap();
  s.upsert(&trial("NCT00000030", Some("2025-02"), TrialStatus::Recruiting))
    .await
    .unwrap();
  s.upsert(&trial("NCT00000033", Some("2025-04-01"), TrialStatus::Recruiting))
    .await
    .unwrap();
  s.upsert(&trial("NCT00000034", None, TrialStatus::Recruiting))
    .await
    .unwrap();

  let ids = |trials: Vec<readout_core::store::TrackedTrial>| -> Vec<String> {
    trials.into_iter().map(|t| t.trial.nct_id).collect()
  };

  let all = s
    .find_by_readout_window(date("2025-01-01"), date("2025-03-31"), &[])
    .await
    .unwrap();
  assert_eq!(ids(all), vec!["NCT00000031", "NCT00000030", "NCT00000032"]);

  let open = s
    .find_by_readout_window(date("2025-01-01"), date("2025-03-31"), &[
      TrialStatus::Recruiting,
    ])
    .await
    .unwrap();
  assert_eq!(ids(open), vec!["NCT00000030", "NCT00000032"]);
}

#[tokio::test]
async fn undated_trials_are_found_separately() {
  let s = store().await;
  s.upsert(&trial("NCT00000040", None, TrialStatus::Recruiting))
    .await
    .unwrap();
  s.upsert(&trial("NCT00000041", None, TrialStatus::Withdrawn))
    .await
    .unwrap();
  s.upsert(&trial("NCT00000042", Some("2025-01-01"), TrialStatus::Recruiting))
    .await
    .unwrap();

  assert_eq!(s.find_without_completion_date(&[]).await.unwrap().len(), 2);
  let open = s
    .find_without_completion_date(&[TrialStatus::Recruiting])
    .await
    .unwrap();
  assert_eq!(open.len(), 1);
  assert_eq!(open[0].trial.nct_id, "NCT00000040");
}

#[tokio::test]
async fn list_nct_ids_is_sorted_and_limited() {
  let s = store().await;
  for id in ["NCT3", "NCT1", "NCT2"] {
    s.upsert(&trial(id, None, TrialStatus::Recruiting)).await.unwrap();
  }
  assert_eq!(s.list_nct_ids(None).await.unwrap(), vec!["NCT1", "NCT2", "NCT3"]);
  assert_eq!(s.list_nct_ids(Some(2)).await.unwrap(), vec!["NCT1", "NCT2"]);
}

#[tokio::test]
async fn get_trial_missing_returns_none() {
  let s = store().await;
  assert!(s.get_trial("NCT00000000").await.unwrap().is_none());
}

// ─── Sync runs ───────────────────────────────────────────────────────────────

fn run(topic: &str, minutes_ago: i64, status: RunStatus) -> SyncRun {
  let started_at = Utc::now() - Duration::minutes(minutes_ago);
  SyncRun {
    sync_run_id: Uuid::new_v4(),
    topic_id: topic.into(),
    started_at,
    finished_at: started_at + Duration::seconds(30),
    status,
    counts: SyncCounts { created: 3, updated: 1, unchanged: 5, failed: 1 },
    pages_fetched: 2,
    records_seen: 10,
    failure_reason: (status == RunStatus::Failed).then(|| "HTTP 503".to_owned()),
  }
}

#[tokio::test]
async fn sync_runs_round_trip_newest_first() {
  let s = store().await;
  let old = run("oncology", 60, RunStatus::Completed);
  let new = run("oncology", 5, RunStatus::Failed);
  let other = run("cardio", 1, RunStatus::Cancelled);
  for r in [&old, &new, &other] {
    s.record_sync_run(r).await.unwrap();
  }

  let all = s.list_sync_runs(None, 10).await.unwrap();
  assert_eq!(all.len(), 3);
  assert_eq!(all[0].topic_id, "cardio");

  let oncology = s.list_sync_runs(Some("oncology"), 10).await.unwrap();
  assert_eq!(oncology.len(), 2);
  assert_eq!(oncology[0].sync_run_id, new.sync_run_id);
  assert_eq!(oncology[0].failure_reason.as_deref(), Some("HTTP 503"));
  assert_eq!(oncology[0].counts, new.counts);
  assert_eq!(oncology[1].sync_run_id, old.sync_run_id);

  assert_eq!(s.list_sync_runs(None, 1).await.unwrap().len(), 1);
}

// ─── Citations ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn citations_attach_and_mark_checked() {
  let s = store().await;
  s.upsert(&trial("NCT00000050", None, TrialStatus::Completed))
    .await
    .unwrap();

  let before = s.get_trial("NCT00000050").await.unwrap().unwrap();
  assert_eq!(before.known_citation_count(), None);

  assert_eq!(s.attach_citations("NCT00000050", &[]).await.unwrap(), 0);
  let checked = s.get_trial("NCT00000050").await.unwrap().unwrap();
  assert_eq!(checked.known_citation_count(), Some(0));

  let mut paper = Citation::new("38000001");
  paper.title = Some("Results".into());
  s.attach_citations("NCT00000050", &[paper.clone()]).await.unwrap();

  paper.doi = Some("10.1000/xyz".into());
  s.attach_citations("NCT00000050", &[paper.clone()]).await.unwrap();

  let linked = s.get_trial("NCT00000050").await.unwrap().unwrap();
  assert_eq!(linked.citations, vec![paper]);
  assert_eq!(linked.known_citation_count(), Some(1));
}

#[tokio::test]
async fn citations_for_missing_trial_fail() {
  let s = store().await;
  let err = s
    .attach_citations("NCT99999999", &[Citation::new("1")])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::TrialNotFound(_)));
}
