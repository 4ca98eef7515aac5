//! Database migrations for fpl-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Fantasy entries, keyed by upstream entry id
CREATE TABLE IF NOT EXISTS entries (
    entry_id INTEGER PRIMARY KEY,
    entry_name TEXT NOT NULL,
    player_name TEXT NOT NULL,
    region TEXT,
    started_event INTEGER,
    overall_points INTEGER,
    overall_rank INTEGER,
    bank INTEGER,
    team_value INTEGER,
    event_context INTEGER,
    updated_at TEXT NOT NULL
);

-- Gameweeks, keyed by season and upstream event id
CREATE TABLE IF NOT EXISTS events (
    season TEXT NOT NULL,
    event_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    deadline_time TEXT,
    is_current INTEGER NOT NULL DEFAULT 0,
    is_next INTEGER NOT NULL DEFAULT 0,
    finished INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (season, event_id)
);

CREATE INDEX IF NOT EXISTS idx_events_current ON events(season, is_current);

-- Sync job history
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id TEXT NOT NULL,
    source TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL,
    succeeded INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    failed_ids TEXT NOT NULL DEFAULT '[]',
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at DESC);
"#;
