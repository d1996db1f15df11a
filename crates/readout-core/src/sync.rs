//! Upsert outcomes and the append-only sync audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

// ─── Upsert ──────────────────────────────────────────────────────────────────

/// Three-way classification of a single trial write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
  /// First sight of this `nct_id`.
  Created,
  /// The stored snapshot differed in at least one non-volatile field.
  Updated {
    /// Top-level snapshot fields that changed, in name order.
    changed_fields: Vec<String>,
  },
  /// Every non-volatile field matched the stored snapshot.
  Unchanged,
}

impl UpsertOutcome {
  pub fn label(&self) -> &'static str {
    match self {
      Self::Created => "created",
      Self::Updated { .. } => "updated",
      Self::Unchanged => "unchanged",
    }
  }
}

// ─── SyncRun ─────────────────────────────────────────────────────────────────

/// Per-run tallies. `failed` counts records that never reached the store
/// (normalisation failures) plus upserts the store rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
  pub created:   u32,
  pub updated:   u32,
  pub unchanged: u32,
  pub failed:    u32,
}

impl SyncCounts {
  pub fn record(&mut self, outcome: &UpsertOutcome) {
    match outcome {
      UpsertOutcome::Created => self.created += 1,
      UpsertOutcome::Updated { .. } => self.updated += 1,
      UpsertOutcome::Unchanged => self.unchanged += 1,
    }
  }

  pub fn record_failure(&mut self) { self.failed += 1; }

  pub fn total(&self) -> u32 {
    self.created + self.updated + self.unchanged + self.failed
  }

  pub fn merge(&mut self, other: &SyncCounts) {
    self.created += other.created;
    self.updated += other.updated;
    self.unchanged += other.unchanged;
    self.failed += other.failed;
  }
}

/// How a topic's sync pass ended.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
  Completed,
  /// The fetcher gave up; counts cover what was processed before that.
  Failed,
  /// Stopped between two trials at the caller's request.
  Cancelled,
}

/// Audit record of one ingestion pass over one topic.
///
/// Written once when the pass ends and never updated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
  pub sync_run_id:    Uuid,
  pub topic_id:       String,
  pub started_at:     DateTime<Utc>,
  pub finished_at:    DateTime<Utc>,
  pub status:         RunStatus,
  pub counts:         SyncCounts,
  pub pages_fetched:  u32,
  pub records_seen:   u32,
  pub failure_reason: Option<String>,
}

impl SyncRun {
  pub fn is_failed(&self) -> bool { self.status == RunStatus::Failed }
}
