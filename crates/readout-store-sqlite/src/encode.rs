//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, calendar dates as
//! `YYYY-MM-DD`, categorical fields as their registry labels, and the trial
//! snapshot as compact JSON.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use readout_core::{
  Trial,
  citation::Citation,
  store::TrackedTrial,
  sync::{RunStatus, SyncCounts, SyncRun},
  trial::DatePrecision,
};

use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// Fixed-width so that `ORDER BY` on the text column is chronological.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── DatePrecision ───────────────────────────────────────────────────────────

pub fn encode_precision(p: DatePrecision) -> &'static str {
  match p {
    DatePrecision::Day => "day",
    DatePrecision::Month => "month",
    DatePrecision::Year => "year",
  }
}

// ─── Trial columns ───────────────────────────────────────────────────────────

/// The queryable columns of a `trials` row, derived from a [`Trial`]. The
/// authoritative copy is always `raw_snapshot`; these exist for indexing and
/// ad-hoc SQL.
pub struct TrialColumns {
  pub nct_id:                       String,
  pub title:                        String,
  pub phase:                        String,
  pub status:                       String,
  pub sponsor_name:                 Option<String>,
  pub sponsor_class:                String,
  pub enrollment_count:             Option<i64>,
  pub primary_completion_date:      Option<String>,
  pub primary_completion_precision: Option<String>,
  pub last_update_posted:           Option<String>,
  pub has_results:                  bool,
  pub raw_snapshot:                 String,
  pub snapshot_hash:                String,
}

impl TrialColumns {
  pub fn new(trial: &Trial, snapshot: &serde_json::Value, hash: String) -> Self {
    let completion = trial.primary_completion_date.as_ref();
    Self {
      nct_id:                       trial.nct_id.clone(),
      title:                        trial.title.clone(),
      phase:                        trial.phase.as_ref().to_owned(),
      status:                       trial.status.as_ref().to_owned(),
      sponsor_name:                 trial.sponsor_name.clone(),
      sponsor_class:                trial.sponsor_class.as_ref().to_owned(),
      enrollment_count:             trial.enrollment.map(|e| i64::from(e.count)),
      primary_completion_date:      completion.map(|d| d.date.to_string()),
      primary_completion_precision: completion
        .map(|d| encode_precision(d.precision).to_owned()),
      last_update_posted:           trial
        .last_update_posted
        .as_ref()
        .map(|d| d.date.to_string()),
      has_results:                  trial.has_results,
      raw_snapshot:                 snapshot.to_string(),
      snapshot_hash:                hash,
    }
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read from a `citations` row.
pub struct RawCitation {
  pub citation_id: String,
  pub title:       Option<String>,
  pub journal:     Option<String>,
  pub published:   Option<String>,
  pub doi:         Option<String>,
}

impl RawCitation {
  pub fn into_citation(self) -> Citation {
    Citation {
      citation_id: self.citation_id,
      title:       self.title,
      journal:     self.journal,
      published:   self.published,
      doi:         self.doi,
    }
  }
}

/// Raw strings read from a `trials` row plus its association rows.
pub struct RawTrial {
  pub raw_snapshot:         String,
  pub first_seen_at:        String,
  pub last_synced_at:       String,
  pub last_changed_at:      String,
  pub citations_checked_at: Option<String>,
  pub topics:               Vec<String>,
  pub citations:            Vec<RawCitation>,
}

impl RawTrial {
  pub fn into_tracked(self) -> Result<TrackedTrial> {
    let snapshot: serde_json::Value = serde_json::from_str(&self.raw_snapshot)?;
    Ok(TrackedTrial {
      trial:                Trial::from_snapshot(snapshot)?,
      topics:               self.topics.into_iter().collect::<BTreeSet<_>>(),
      citations:            self
        .citations
        .into_iter()
        .map(RawCitation::into_citation)
        .collect(),
      first_seen_at:        decode_dt(&self.first_seen_at)?,
      last_synced_at:       decode_dt(&self.last_synced_at)?,
      last_changed_at:      decode_dt(&self.last_changed_at)?,
      citations_checked_at: self
        .citations_checked_at
        .as_deref()
        .map(decode_dt)
        .transpose()?,
    })
  }
}

/// Raw values read from a `sync_runs` row.
pub struct RawSyncRun {
  pub sync_run_id:    String,
  pub topic_id:       String,
  pub started_at:     String,
  pub finished_at:    String,
  pub status:         String,
  pub created:        u32,
  pub updated:        u32,
  pub unchanged:      u32,
  pub failed:         u32,
  pub pages_fetched:  u32,
  pub records_seen:   u32,
  pub failure_reason: Option<String>,
}

impl RawSyncRun {
  pub fn into_sync_run(self) -> Result<SyncRun> {
    let status: RunStatus =
      self.status.parse().map_err(|_| Error::UnknownValue {
        column: "sync_runs.status",
        value:  self.status.clone(),
      })?;

    Ok(SyncRun {
      sync_run_id: decode_uuid(&self.sync_run_id)?,
      topic_id: self.topic_id,
      started_at: decode_dt(&self.started_at)?,
      finished_at: decode_dt(&self.finished_at)?,
      status,
      counts: SyncCounts {
        created:   self.created,
        updated:   self.updated,
        unchanged: self.unchanged,
        failed:    self.failed,
      },
      pages_fetched: self.pages_fetched,
      records_seen: self.records_seen,
      failure_reason: self.failure_reason,
    })
  }
}
