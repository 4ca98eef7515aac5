//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Database;
use crate::error::DbError;
use crate::models::{EntityId, EntryInfo, Event, SyncRun};

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

/// SQLite's default bound-parameter ceiling is 999 on older builds
const MAX_IN_PARAMS: usize = 500;

const ENTRY_COLUMNS: &str = "entry_id, entry_name, player_name, region, started_event, \
     overall_points, overall_rank, bank, team_value, event_context, updated_at";

const UPSERT_ENTRY: &str = r#"
    INSERT INTO entries
    (entry_id, entry_name, player_name, region, started_event,
     overall_points, overall_rank, bank, team_value, event_context, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(entry_id) DO UPDATE SET
        entry_name = excluded.entry_name,
        player_name = excluded.player_name,
        region = excluded.region,
        started_event = excluded.started_event,
        overall_points = excluded.overall_points,
        overall_rank = excluded.overall_rank,
        bank = excluded.bank,
        team_value = excluded.team_value,
        event_context = excluded.event_context,
        updated_at = excluded.updated_at
"#;

const UPSERT_EVENT: &str = r#"
    INSERT INTO events (season, event_id, name, deadline_time, is_current, is_next, finished)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(season, event_id) DO UPDATE SET
        name = excluded.name,
        deadline_time = excluded.deadline_time,
        is_current = excluded.is_current,
        is_next = excluded.is_next,
        finished = excluded.finished
"#;

fn upsert_entry_row(conn: &rusqlite::Connection, entry: &EntryInfo) -> rusqlite::Result<()> {
    conn.execute(
        UPSERT_ENTRY,
        rusqlite::params![
            entry.entry_id,
            entry.entry_name,
            entry.player_name,
            entry.region,
            entry.started_event,
            entry.overall_points,
            entry.overall_rank,
            entry.bank,
            entry.team_value,
            entry.event_context,
            entry.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<EntryInfo> {
    Ok(EntryInfo {
        entry_id: row.get(0)?,
        entry_name: row.get(1)?,
        player_name: row.get(2)?,
        region: row.get(3)?,
        started_event: row.get(4)?,
        overall_points: row.get(5)?,
        overall_rank: row.get(6)?,
        bank: row.get(7)?,
        team_value: row.get(8)?,
        event_context: row.get(9)?,
        updated_at: required_datetime(10, row.get(10)?)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        event_id: row.get(0)?,
        name: row.get(1)?,
        deadline_time: parse_datetime(row.get::<_, Option<String>>(2)?),
        is_current: row.get(3)?,
        is_next: row.get(4)?,
        finished: row.get(5)?,
    })
}

fn sync_run_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    let source: String = row.get(2)?;
    let failed_ids: String = row.get(7)?;

    Ok(SyncRun {
        id: Some(row.get(0)?),
        workflow_id: row.get(1)?,
        source: source.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
        })?,
        retry_count: row.get(3)?,
        total: row.get::<_, i64>(4)? as usize,
        succeeded: row.get::<_, i64>(5)? as usize,
        failed: row.get::<_, i64>(6)? as usize,
        failed_ids: serde_json::from_str(&failed_ids).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e))
        })?,
        started_at: required_datetime(8, row.get(8)?)?,
        finished_at: required_datetime(9, row.get(9)?)?,
    })
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Entry operations
    // =========================================================================

    async fn upsert_entry(&self, entry: &EntryInfo) -> Result<EntryInfo, DbError> {
        let entry = entry.clone();

        self.conn
            .call(move |conn| {
                upsert_entry_row(conn, &entry)?;
                Ok(entry)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_entries(&self, entries: &[EntryInfo]) -> Result<Vec<EntryInfo>, DbError> {
        let entries = entries.to_vec();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for entry in &entries {
                    upsert_entry_row(&tx, entry)?;
                }
                tx.commit()?;
                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_entry(&self, entry_id: EntityId) -> Result<Option<EntryInfo>, DbError> {
        self.conn
            .call(move |conn| {
                let entry = conn
                    .query_row(
                        &format!("SELECT {} FROM entries WHERE entry_id = ?1", ENTRY_COLUMNS),
                        [entry_id],
                        entry_from_row,
                    )
                    .optional()?;
                Ok(entry)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_entries(&self, entry_ids: &[EntityId]) -> Result<Vec<EntryInfo>, DbError> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        let entry_ids = entry_ids.to_vec();

        self.conn
            .call(move |conn| {
                let mut entries = Vec::with_capacity(entry_ids.len());
                for chunk in entry_ids.chunks(MAX_IN_PARAMS) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM entries WHERE entry_id IN ({})",
                        ENTRY_COLUMNS, placeholders
                    ))?;

                    for entry in stmt.query_map(rusqlite::params_from_iter(chunk.iter()), entry_from_row)? {
                        entries.push(entry?);
                    }
                }

                entries.sort_by_key(|e: &EntryInfo| e.entry_id);
                entries.dedup_by_key(|e| e.entry_id);
                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_entry_ids(&self) -> Result<Vec<EntityId>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT entry_id FROM entries ORDER BY entry_id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<EntityId>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Event operations
    // =========================================================================

    async fn upsert_events(&self, season: &str, events: &[Event]) -> Result<(), DbError> {
        let season = season.to_string();
        let events = events.to_vec();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for event in &events {
                    tx.execute(
                        UPSERT_EVENT,
                        rusqlite::params![
                            season,
                            event.event_id,
                            event.name,
                            event.deadline_time.map(|t| t.to_rfc3339()),
                            event.is_current,
                            event.is_next,
                            event.finished,
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn find_current_event(&self, season: &str) -> Result<Option<Event>, DbError> {
        let season = season.to_string();

        self.conn
            .call(move |conn| {
                let event = conn
                    .query_row(
                        r#"
                        SELECT event_id, name, deadline_time, is_current, is_next, finished
                        FROM events
                        WHERE season = ?1 AND is_current = 1
                        ORDER BY event_id DESC
                        LIMIT 1
                        "#,
                        [season],
                        event_from_row,
                    )
                    .optional()?;
                Ok(event)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Sync run operations
    // =========================================================================

    async fn record_sync_run(&self, run: &SyncRun) -> Result<i64, DbError> {
        let failed_ids = serde_json::to_string(&run.failed_ids)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        let run = run.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_runs
                    (workflow_id, source, retry_count, total, succeeded, failed,
                     failed_ids, started_at, finished_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    rusqlite::params![
                        run.workflow_id,
                        run.source.to_string(),
                        run.retry_count,
                        run.total as i64,
                        run.succeeded as i64,
                        run.failed as i64,
                        failed_ids,
                        run.started_at.to_rfc3339(),
                        run.finished_at.to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn recent_sync_runs(&self, limit: u32) -> Result<Vec<SyncRun>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, workflow_id, source, retry_count, total, succeeded, failed,
                           failed_ids, started_at, finished_at
                    FROM sync_runs
                    ORDER BY id DESC
                    LIMIT ?1
                    "#,
                )?;

                let runs = stmt
                    .query_map([limit], sync_run_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(runs)
            })
            .await
            .map_err(Into::into)
    }
}

/// Parse datetime string from SQLite
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}

fn required_datetime(column: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    parse_datetime(Some(s.clone())).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Text,
            format!("invalid datetime: {}", s).into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobSource;

    fn entry(id: EntityId, points: i64) -> EntryInfo {
        EntryInfo {
            entry_id: id,
            entry_name: format!("Team {}", id),
            player_name: "Test Manager".to_string(),
            region: Some("England".to_string()),
            started_event: Some(1),
            overall_points: Some(points),
            overall_rank: Some(1000),
            bank: Some(5),
            team_value: Some(1000),
            event_context: Some(10),
            updated_at: DateTime::parse_from_rfc3339("2024-11-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    fn event(id: i32, is_current: bool) -> Event {
        Event {
            event_id: id,
            name: format!("Gameweek {}", id),
            deadline_time: None,
            is_current,
            is_next: false,
            finished: !is_current,
        }
    }

    // Test 1: Create in-memory database
    #[tokio::test]
    async fn test_create_in_memory_database() {
        let db = SqliteDatabase::in_memory().await;
        assert!(db.is_ok());
    }

    // Test 2: Upsert then find returns the same record
    #[tokio::test]
    async fn test_upsert_and_find_entry() {
        let db = SqliteDatabase::in_memory().await.unwrap();

        let stored = db.upsert_entry(&entry(1, 50)).await.unwrap();
        assert_eq!(stored, entry(1, 50));

        let found = db.find_entry(1).await.unwrap();
        assert_eq!(found, Some(entry(1, 50)));
        assert!(db.find_entry(2).await.unwrap().is_none());
    }

    // Test 3: Upserting the same natural key twice keeps one row with the latest values
    #[tokio::test]
    async fn test_upsert_is_idempotent_by_natural_key() {
        let db = SqliteDatabase::in_memory().await.unwrap();

        db.upsert_entry(&entry(1, 50)).await.unwrap();
        db.upsert_entry(&entry(1, 50)).await.unwrap();
        db.upsert_entry(&entry(1, 75)).await.unwrap();

        assert_eq!(db.list_entry_ids().await.unwrap(), vec![1]);
        assert_eq!(
            db.find_entry(1).await.unwrap().unwrap().overall_points,
            Some(75)
        );
    }

    // Test 4: Batch upsert and lookup
    #[tokio::test]
    async fn test_upsert_entries_batch() {
        let db = SqliteDatabase::in_memory().await.unwrap();

        let batch = vec![entry(3, 30), entry(1, 10), entry(2, 20)];
        let stored = db.upsert_entries(&batch).await.unwrap();
        assert_eq!(stored.len(), 3);

        assert_eq!(db.list_entry_ids().await.unwrap(), vec![1, 2, 3]);

        let found = db.find_entries(&[2, 3, 99]).await.unwrap();
        assert_eq!(found, vec![entry(2, 20), entry(3, 30)]);
        assert!(db.find_entries(&[]).await.unwrap().is_empty());
    }

    // Test 5: Current event lookup
    #[tokio::test]
    async fn test_find_current_event() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        assert!(db.find_current_event("2425").await.unwrap().is_none());

        db.upsert_events("2425", &[event(1, false), event(2, true), event(3, false)])
            .await
            .unwrap();
        assert_eq!(db.find_current_event("2425").await.unwrap().unwrap().event_id, 2);

        // Gameweek rollover updates rows in place
        db.upsert_events("2425", &[event(2, false), event(3, true)])
            .await
            .unwrap();
        assert_eq!(db.find_current_event("2425").await.unwrap().unwrap().event_id, 3);
    }

    // Test 6: Event deadlines round-trip
    #[tokio::test]
    async fn test_event_deadline_roundtrip() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let deadline = DateTime::parse_from_rfc3339("2024-08-16T17:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        db.upsert_events("2425", &[Event {
            deadline_time: Some(deadline),
            ..event(1, true)
        }])
        .await
        .unwrap();

        let current = db.find_current_event("2425").await.unwrap().unwrap();
        assert_eq!(current.deadline_time, Some(deadline));
    }

    // Test 7: Sync runs are recorded and listed newest first
    #[tokio::test]
    async fn test_record_and_list_sync_runs() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let now = Utc::now();

        for retry_count in 0..3u32 {
            let run = SyncRun {
                id: None,
                workflow_id: format!("wf-{}", retry_count),
                source: if retry_count == 0 {
                    JobSource::Manual
                } else {
                    JobSource::Retry
                },
                retry_count,
                total: 3,
                succeeded: 2,
                failed: 1,
                failed_ids: vec![2],
                started_at: now,
                finished_at: now,
            };
            let id = db.record_sync_run(&run).await.unwrap();
            assert!(id > 0);
        }

        let runs = db.recent_sync_runs(2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].workflow_id, "wf-2");
        assert_eq!(runs[0].source, JobSource::Retry);
        assert_eq!(runs[0].failed_ids, vec![2]);
        assert_eq!(runs[1].retry_count, 1);
    }

    // Test 8: File-backed database persists across connections
    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fpl.db");
        let path = path.to_str().unwrap();

        {
            let db = SqliteDatabase::new(path).await.unwrap();
            db.upsert_entry(&entry(5, 55)).await.unwrap();
        }

        let db = SqliteDatabase::new(path).await.unwrap();
        assert_eq!(db.find_entry(5).await.unwrap(), Some(entry(5, 55)));
    }

    // Test 9: Gameweeks are scoped to their season
    #[tokio::test]
    async fn test_current_event_per_season() {
        let db = SqliteDatabase::in_memory().await.unwrap();

        db.upsert_events("2425", &[event(37, false), event(38, true)])
            .await
            .unwrap();
        assert!(db.find_current_event("2526").await.unwrap().is_none());

        db.upsert_events("2526", &[event(1, true)]).await.unwrap();
        assert_eq!(db.find_current_event("2526").await.unwrap().unwrap().event_id, 1);
        assert_eq!(db.find_current_event("2425").await.unwrap().unwrap().event_id, 38);
    }

    // Test 10: Lookups wider than one statement's parameter limit are chunked
    #[tokio::test]
    async fn test_find_entries_chunked() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let entries: Vec<EntryInfo> = (1..=1200).map(|id| entry(id, id)).collect();
        db.upsert_entries(&entries).await.unwrap();

        let ids: Vec<EntityId> = (1..=1500).rev().collect();
        let found = db.find_entries(&ids).await.unwrap();

        assert_eq!(found.len(), 1200);
        assert_eq!(found.first().unwrap().entry_id, 1);
        assert_eq!(found.last().unwrap().entry_id, 1200);
    }

    // Test 11: Parse datetime formats
    #[test]
    fn test_parse_datetime() {
        assert!(parse_datetime(Some("2024-01-01T00:00:00Z".to_string())).is_some());
        assert!(parse_datetime(Some("2024-01-01 00:00:00".to_string())).is_some());
        assert!(parse_datetime(Some("yesterday".to_string())).is_none());
        assert!(parse_datetime(None).is_none());
    }
}
