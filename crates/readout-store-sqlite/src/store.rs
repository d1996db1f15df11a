//! [`SqliteStore`]: the SQLite implementation of [`TrialStore`].

use std::{collections::BTreeSet, path::Path, time::Duration};

use chrono::{NaiveDate, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use readout_core::{
  Trial,
  citation::Citation,
  store::{TrackedTrial, TrialStore},
  sync::{SyncRun, UpsertOutcome},
  trial::TrialStatus,
};

use crate::{
  ChangeDetection, Error, Result,
  encode::{
    RawCitation, RawSyncRun, RawTrial, TrialColumns, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_TRIALS: &str = "
  SELECT t.nct_id, t.raw_snapshot, t.first_seen_at, t.last_synced_at,
         t.last_changed_at, t.citations_checked_at
  FROM trials t";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A trial store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:             tokio_rusqlite::Connection,
  change_detection: ChangeDetection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, change_detection: ChangeDetection::default() };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, change_detection: ChangeDetection::default() };
    store.init_schema().await?;
    Ok(store)
  }

  /// Use `change_detection` when classifying upserts.
  pub fn with_change_detection(mut self, change_detection: ChangeDetection) -> Self {
    self.change_detection = change_detection;
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Snapshot write plus optional topic association, in one immediate
  /// transaction.
  async fn write_trial(
    &self,
    trial: &Trial,
    topic_id: Option<&str>,
  ) -> Result<UpsertOutcome> {
    let snapshot = trial.snapshot()?;
    let hash = self.change_detection.fingerprint(&snapshot);
    let cols = TrialColumns::new(trial, &snapshot, hash);
    let change_detection = self.change_detection.clone();
    let topic_id = topic_id.map(str::to_owned);
    let now = encode_dt(Utc::now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<(String, String)> = tx
          .query_row(
            "SELECT snapshot_hash, raw_snapshot FROM trials WHERE nct_id = ?1",
            rusqlite::params![cols.nct_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;

        let outcome = match stored {
          None => {
            tx.execute(
              "INSERT INTO trials (
                 nct_id, title, phase, status, sponsor_name, sponsor_class,
                 enrollment_count, primary_completion_date,
                 primary_completion_precision, last_update_posted, has_results,
                 raw_snapshot, snapshot_hash,
                 first_seen_at, last_synced_at, last_changed_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         ?14, ?14, ?14)",
              rusqlite::params![
                cols.nct_id,
                cols.title,
                cols.phase,
                cols.status,
                cols.sponsor_name,
                cols.sponsor_class,
                cols.enrollment_count,
                cols.primary_completion_date,
                cols.primary_completion_precision,
                cols.last_update_posted,
                cols.has_results,
                cols.raw_snapshot,
                cols.snapshot_hash,
                now,
              ],
            )?;
            UpsertOutcome::Created
          }
          Some((stored_hash, stored_snapshot)) => {
            let changed_fields = if stored_hash == cols.snapshot_hash {
              Vec::new()
            } else {
              change_detection.changed_fields(&stored_snapshot, &snapshot)
            };
            let changed = !changed_fields.is_empty();

            // The latest snapshot is kept even when only volatile fields moved.
            tx.execute(
              "UPDATE trials SET
                 title = ?2, phase = ?3, status = ?4, sponsor_name = ?5,
                 sponsor_class = ?6, enrollment_count = ?7,
                 primary_completion_date = ?8, primary_completion_precision = ?9,
                 last_update_posted = ?10, has_results = ?11,
                 raw_snapshot = ?12, snapshot_hash = ?13,
                 last_synced_at = ?14,
                 last_changed_at = CASE WHEN ?15 THEN ?14 ELSE last_changed_at END
               WHERE nct_id = ?1",
              rusqlite::params![
                cols.nct_id,
                cols.title,
                cols.phase,
                cols.status,
                cols.sponsor_name,
                cols.sponsor_class,
                cols.enrollment_count,
                cols.primary_completion_date,
                cols.primary_completion_precision,
                cols.last_update_posted,
                cols.has_results,
                cols.raw_snapshot,
                cols.snapshot_hash,
                now,
                changed,
              ],
            )?;

            if changed {
              UpsertOutcome::Updated { changed_fields }
            } else {
              UpsertOutcome::Unchanged
            }
          }
        };

        if let Some(topic_id) = topic_id {
          tx.execute(
            "INSERT OR IGNORE INTO trial_topics (nct_id, topic_id, associated_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![cols.nct_id, topic_id, now],
          )?;
        }

        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    tracing::debug!(nct_id = %trial.nct_id, outcome = outcome.label(), "upserted trial");
    Ok(outcome)
  }

  async fn query_trials(&self, sql: String, params: Vec<String>) -> Result<Vec<TrackedTrial>> {
    let raws = self
      .conn
      .call(move |conn| Ok(load_trials(conn, &sql, &params)?))
      .await?;

    raws.into_iter().map(RawTrial::into_tracked).collect()
  }
}

/// Append `AND status IN (...)` for a non-empty status filter.
fn status_clause(statuses: &[TrialStatus], params: &mut Vec<String>) -> String {
  if statuses.is_empty() {
    return String::new();
  }
  let placeholders = vec!["?"; statuses.len()].join(", ");
  params.extend(statuses.iter().map(|s| s.as_ref().to_owned()));
  format!(" AND t.status IN ({placeholders})")
}

/// Run a `SELECT_TRIALS`-based query and attach topics and citations.
fn load_trials(
  conn: &rusqlite::Connection,
  sql: &str,
  params: &[String],
) -> rusqlite::Result<Vec<RawTrial>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt
    .query_map(rusqlite::params_from_iter(params.iter()), |r| {
      Ok((r.get::<_, String>(0)?, RawTrial {
        raw_snapshot:         r.get(1)?,
        first_seen_at:        r.get(2)?,
        last_synced_at:       r.get(3)?,
        last_changed_at:      r.get(4)?,
        citations_checked_at: r.get(5)?,
        topics:               Vec::new(),
        citations:            Vec::new(),
      }))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut topic_stmt = conn.prepare(
    "SELECT topic_id FROM trial_topics WHERE nct_id = ?1 ORDER BY topic_id",
  )?;
  let mut citation_stmt = conn.prepare(
    "SELECT citation_id, title, journal, published, doi
     FROM citations WHERE nct_id = ?1 ORDER BY citation_id",
  )?;

  rows
    .into_iter()
    .map(|(nct_id, mut raw)| {
      raw.topics = topic_stmt
        .query_map(rusqlite::params![nct_id], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
      raw.citations = citation_stmt
        .query_map(rusqlite::params![nct_id], |r| {
          Ok(RawCitation {
            citation_id: r.get(0)?,
            title:       r.get(1)?,
            journal:     r.get(2)?,
            published:   r.get(3)?,
            doi:         r.get(4)?,
          })
        })?
        .collect::<rusqlite::Result<_>>()?;
      Ok(raw)
    })
    .collect()
}

fn trial_exists(conn: &rusqlite::Connection, nct_id: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM trials WHERE nct_id = ?1",
        rusqlite::params![nct_id],
        |_| Ok(true),
      )
      .optional()?
      .unwrap_or(false),
  )
}

// ─── TrialStore impl ─────────────────────────────────────────────────────────

impl TrialStore for SqliteStore {
  type Error = Error;

  // ── Trials ──────────────────────────────────────────────────────────────

  async fn upsert(&self, trial: &Trial) -> Result<UpsertOutcome> {
    self.write_trial(trial, None).await
  }

  async fn upsert_for_topic(
    &self,
    trial: &Trial,
    topic_id: &str,
  ) -> Result<UpsertOutcome> {
    self.write_trial(trial, Some(topic_id)).await
  }

  async fn get_trial(&self, nct_id: &str) -> Result<Option<TrackedTrial>> {
    let sql = format!("{SELECT_TRIALS} WHERE t.nct_id = ?");
    let mut found = self.query_trials(sql, vec![nct_id.to_owned()]).await?;
    Ok(found.pop())
  }

  async fn list_nct_ids(&self, limit: Option<usize>) -> Result<Vec<String>> {
    // SQLite treats a negative LIMIT as "no limit".
    let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));

    let ids = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT nct_id FROM trials ORDER BY nct_id LIMIT ?1")?;
        let ids = stmt
          .query_map(rusqlite::params![limit], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
      })
      .await?;
    Ok(ids)
  }

  // ── Topic associations ──────────────────────────────────────────────────

  async fn associate_topic(&self, nct_id: &str, topic_id: &str) -> Result<bool> {
    let nct = nct_id.to_owned();
    let topic = topic_id.to_owned();
    let now = encode_dt(Utc::now());

    let inserted: Option<bool> = self
      .conn
      .call(move |conn| {
        if !trial_exists(conn, &nct)? {
          return Ok(None);
        }
        let n = conn.execute(
          "INSERT OR IGNORE INTO trial_topics (nct_id, topic_id, associated_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![nct, topic, now],
        )?;
        Ok(Some(n == 1))
      })
      .await?;

    inserted.ok_or_else(|| Error::TrialNotFound(nct_id.to_owned()))
  }

  async fn prune_topic(
    &self,
    topic_id: &str,
    retain: &BTreeSet<String>,
  ) -> Result<usize> {
    let topic = topic_id.to_owned();
    let retain = retain.clone();

    let removed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let members: Vec<String> = tx
          .prepare("SELECT nct_id FROM trial_topics WHERE topic_id = ?1")?
          .query_map(rusqlite::params![topic], |r| r.get(0))?
          .collect::<rusqlite::Result<_>>()?;

        let mut removed = 0;
        for nct_id in members.iter().filter(|id| !retain.contains(*id)) {
          removed += tx.execute(
            "DELETE FROM trial_topics WHERE nct_id = ?1 AND topic_id = ?2",
            rusqlite::params![nct_id, topic],
          )?;
        }
        tx.commit()?;
        Ok(removed)
      })
      .await?;

    tracing::info!(topic_id, removed, "pruned topic associations");
    Ok(removed)
  }

  // ── Queries ─────────────────────────────────────────────────────────────

  async fn find_by_readout_window(
    &self,
    start: NaiveDate,
    end: NaiveDate,
    statuses: &[TrialStatus],
  ) -> Result<Vec<TrackedTrial>> {
    let mut params = vec![start.to_string(), end.to_string()];
    let filter = status_clause(statuses, &mut params);
    let sql = format!(
      "{SELECT_TRIALS}
       WHERE t.primary_completion_date BETWEEN ? AND ?{filter}
       ORDER BY t.primary_completion_date, t.nct_id"
    );
    self.query_trials(sql, params).await
  }

  async fn find_without_completion_date(
    &self,
    statuses: &[TrialStatus],
  ) -> Result<Vec<TrackedTrial>> {
    let mut params = Vec::new();
    let filter = status_clause(statuses, &mut params);
    let sql = format!(
      "{SELECT_TRIALS}
       WHERE t.primary_completion_date IS NULL{filter}
       ORDER BY t.nct_id"
    );
    self.query_trials(sql, params).await
  }

  async fn find_by_topic(&self, topic_id: &str) -> Result<Vec<TrackedTrial>> {
    let sql = format!(
      "{SELECT_TRIALS}
       JOIN trial_topics tt ON tt.nct_id = t.nct_id
       WHERE tt.topic_id = ?
       ORDER BY t.primary_completion_date IS NULL, t.primary_completion_date, t.nct_id"
    );
    self.query_trials(sql, vec![topic_id.to_owned()]).await
  }

  // ── Sync audit ──────────────────────────────────────────────────────────

  async fn record_sync_run(&self, run: &SyncRun) -> Result<()> {
    let id_str = encode_uuid(run.sync_run_id);
    let topic = run.topic_id.clone();
    let started = encode_dt(run.started_at);
    let finished = encode_dt(run.finished_at);
    let status = run.status.as_ref().to_owned();
    let counts = run.counts;
    let pages = run.pages_fetched;
    let seen = run.records_seen;
    let reason = run.failure_reason.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sync_runs (
             sync_run_id, topic_id, started_at, finished_at, status,
             created, updated, unchanged, failed,
             pages_fetched, records_seen, failure_reason
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
          rusqlite::params![
            id_str,
            topic,
            started,
            finished,
            status,
            counts.created,
            counts.updated,
            counts.unchanged,
            counts.failed,
            pages,
            seen,
            reason,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_sync_runs(
    &self,
    topic_id: Option<&str>,
    limit: usize,
  ) -> Result<Vec<SyncRun>> {
    let topic = topic_id.map(str::to_owned);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawSyncRun> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT sync_run_id, topic_id, started_at, finished_at, status,
                  created, updated, unchanged, failed,
                  pages_fetched, records_seen, failure_reason
           FROM sync_runs
           WHERE (?1 IS NULL OR topic_id = ?1)
           ORDER BY started_at DESC, rowid DESC
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![topic, limit], |r| {
            Ok(RawSyncRun {
              sync_run_id:    r.get(0)?,
              topic_id:       r.get(1)?,
              started_at:     r.get(2)?,
              finished_at:    r.get(3)?,
              status:         r.get(4)?,
              created:        r.get(5)?,
              updated:        r.get(6)?,
              unchanged:      r.get(7)?,
              failed:         r.get(8)?,
              pages_fetched:  r.get(9)?,
              records_seen:   r.get(10)?,
              failure_reason: r.get(11)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSyncRun::into_sync_run).collect()
  }

  // ── Citations ───────────────────────────────────────────────────────────

  async fn attach_citations(
    &self,
    nct_id: &str,
    citations: &[Citation],
  ) -> Result<usize> {
    let nct = nct_id.to_owned();
    let citations = citations.to_vec();
    let now = encode_dt(Utc::now());

    let written: Option<usize> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !trial_exists(&tx, &nct)? {
          return Ok(None);
        }

        for c in &citations {
          tx.execute(
            "INSERT INTO citations (
               nct_id, citation_id, title, journal, published, doi, last_seen_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (nct_id, citation_id) DO UPDATE SET
               title = excluded.title,
               journal = excluded.journal,
               published = excluded.published,
               doi = excluded.doi,
               last_seen_at = excluded.last_seen_at",
            rusqlite::params![
              nct,
              c.citation_id,
              c.title,
              c.journal,
              c.published,
              c.doi,
              now,
            ],
          )?;
        }
        tx.execute(
          "UPDATE trials SET citations_checked_at = ?2 WHERE nct_id = ?1",
          rusqlite::params![nct, now],
        )?;
        tx.commit()?;
        Ok(Some(citations.len()))
      })
      .await?;

    written.ok_or_else(|| Error::TrialNotFound(nct_id.to_owned()))
  }
}
