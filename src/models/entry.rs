//! Fantasy entry (team) models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

/// Stored summary of one fantasy entry
///
/// `entry_id` is the natural key: upserting the same entry twice leaves
/// one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryInfo {
    /// Upstream entry id
    pub entry_id: EntityId,
    /// Team name
    pub entry_name: String,
    /// Manager's full name
    pub player_name: String,
    /// Manager's region
    pub region: Option<String>,
    /// Gameweek the entry joined
    pub started_event: Option<i32>,
    /// Overall points
    pub overall_points: Option<i64>,
    /// Overall rank
    pub overall_rank: Option<i64>,
    /// Money in the bank, in tenths
    pub bank: Option<i64>,
    /// Squad value, in tenths
    pub team_value: Option<i64>,
    /// Gameweek the record was synced for
    pub event_context: Option<i32>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

/// `GET /entry/{id}/` payload, reduced to the fields we keep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryResponse {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub player_first_name: String,
    #[serde(default)]
    pub player_last_name: String,
    #[serde(default)]
    pub player_region_name: Option<String>,
    #[serde(default)]
    pub started_event: Option<i32>,
    #[serde(default)]
    pub summary_overall_points: Option<i64>,
    #[serde(default)]
    pub summary_overall_rank: Option<i64>,
    #[serde(default)]
    pub last_deadline_bank: Option<i64>,
    #[serde(default)]
    pub last_deadline_value: Option<i64>,
    #[serde(default)]
    pub current_event: Option<i32>,
}

impl EntryResponse {
    /// Convert to the stored record
    ///
    /// An explicit `event_context` wins over the payload's `current_event`.
    pub fn into_entry_info(self, event_context: Option<i32>) -> EntryInfo {
        let player_name = format!("{} {}", self.player_first_name, self.player_last_name)
            .trim()
            .to_string();

        EntryInfo {
            entry_id: self.id,
            entry_name: self.name,
            player_name,
            region: self.player_region_name,
            started_event: self.started_event,
            overall_points: self.summary_overall_points,
            overall_rank: self.summary_overall_rank,
            bank: self.last_deadline_bank,
            team_value: self.last_deadline_value,
            event_context: event_context.or(self.current_event),
            updated_at: Utc::now(),
        }
    }
}
