//! SQL schema for the readout SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per registry identifier, holding the latest fetched snapshot.
-- Rows are never deleted by the pipeline.
CREATE TABLE IF NOT EXISTS trials (
    nct_id                       TEXT PRIMARY KEY,
    title                        TEXT NOT NULL,
    phase                        TEXT NOT NULL,
    status                       TEXT NOT NULL,
    sponsor_name                 TEXT,
    sponsor_class                TEXT NOT NULL,
    enrollment_count             INTEGER,
    primary_completion_date      TEXT,     -- YYYY-MM-DD, coarse dates pinned to period start
    primary_completion_precision TEXT,     -- 'day' | 'month' | 'year'
    last_update_posted           TEXT,
    has_results                  INTEGER NOT NULL DEFAULT 0,
    raw_snapshot                 TEXT NOT NULL,   -- JSON-encoded Trial
    snapshot_hash                TEXT NOT NULL,   -- SHA-256 over non-volatile fields
    first_seen_at                TEXT NOT NULL,
    last_synced_at               TEXT NOT NULL,
    last_changed_at              TEXT NOT NULL,
    citations_checked_at         TEXT
);

-- Additive topic membership; survives topic config changes.
CREATE TABLE IF NOT EXISTS trial_topics (
    nct_id        TEXT NOT NULL REFERENCES trials(nct_id),
    topic_id      TEXT NOT NULL,
    associated_at TEXT NOT NULL,
    PRIMARY KEY (nct_id, topic_id)
);

-- Append-only audit log: rows are inserted once and never updated.
CREATE TABLE IF NOT EXISTS sync_runs (
    sync_run_id    TEXT PRIMARY KEY,
    topic_id       TEXT NOT NULL,
    started_at     TEXT NOT NULL,
    finished_at    TEXT NOT NULL,
    status         TEXT NOT NULL,   -- 'completed' | 'failed' | 'cancelled'
    created        INTEGER NOT NULL,
    updated        INTEGER NOT NULL,
    unchanged      INTEGER NOT NULL,
    failed         INTEGER NOT NULL,
    pages_fetched  INTEGER NOT NULL,
    records_seen   INTEGER NOT NULL,
    failure_reason TEXT
);

CREATE TABLE IF NOT EXISTS citations (
    nct_id       TEXT NOT NULL REFERENCES trials(nct_id),
    citation_id  TEXT NOT NULL,
    title        TEXT,
    journal      TEXT,
    published    TEXT,
    doi          TEXT,
    last_seen_at TEXT NOT NULL,
    PRIMARY KEY (nct_id, citation_id)
);

CREATE INDEX IF NOT EXISTS trials_completion_idx ON trials(primary_completion_date);
CREATE INDEX IF NOT EXISTS trials_status_idx     ON trials(status);
CREATE INDEX IF NOT EXISTS trial_topics_topic_idx ON trial_topics(topic_id);
CREATE INDEX IF NOT EXISTS sync_runs_topic_idx   ON sync_runs(topic_id, started_at);

PRAGMA user_version = 1;
";
