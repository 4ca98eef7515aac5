//! Durable store for fpl-sync
//!
//! This module defines the repository trait and its SQLite implementation.
//! Every write is an upsert by natural key, so replaying a sync is safe.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{EntityId, EntryInfo, Event, SyncRun};

/// Repository trait for data persistence
///
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Entry operations
    // =========================================================================

    /// Insert or update an entry by `entry_id`; returns the stored record
    async fn upsert_entry(&self, entry: &EntryInfo) -> Result<EntryInfo, DbError>;

    /// Upsert several entries in one transaction
    async fn upsert_entries(&self, entries: &[EntryInfo]) -> Result<Vec<EntryInfo>, DbError>;

    /// Get an entry by id
    async fn find_entry(&self, entry_id: EntityId) -> Result<Option<EntryInfo>, DbError>;

    /// Get every stored entry among `entry_ids`
    async fn find_entries(&self, entry_ids: &[EntityId]) -> Result<Vec<EntryInfo>, DbError>;

    /// Ids of all known entries, ascending
    async fn list_entry_ids(&self) -> Result<Vec<EntityId>, DbError>;

    // =========================================================================
    // Event operations
    // =========================================================================

    /// Upsert one season's gameweeks by `(season, event_id)` in one transaction
    async fn upsert_events(&self, season: &str, events: &[Event]) -> Result<(), DbError>;

    /// The gameweek flagged as current in `season`, if any
    async fn find_current_event(&self, season: &str) -> Result<Option<Event>, DbError>;

    // =========================================================================
    // Sync run operations
    // =========================================================================

    /// Append a sync run record; returns its row id
    async fn record_sync_run(&self, run: &SyncRun) -> Result<i64, DbError>;

    /// Most recent sync runs, newest first
    async fn recent_sync_runs(&self, limit: u32) -> Result<Vec<SyncRun>, DbError>;
}
