//! Gameweek (event) models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored gameweek; `event_id` is the natural key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Gameweek number
    pub event_id: i32,
    /// Display name, e.g. "Gameweek 12"
    pub name: String,
    /// Transfer deadline
    pub deadline_time: Option<DateTime<Utc>>,
    /// Whether this is the current gameweek
    pub is_current: bool,
    /// Whether this is the next gameweek
    pub is_next: bool,
    /// Whether all fixtures are finished
    pub finished: bool,
}

/// One element of `bootstrap-static.events`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResponse {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub deadline_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub is_next: bool,
    #[serde(default)]
    pub finished: bool,
}

impl From<EventResponse> for Event {
    fn from(response: EventResponse) -> Self {
        Self {
            event_id: response.id,
            name: response.name,
            deadline_time: response.deadline_time,
            is_current: response.is_current,
            is_next: response.is_next,
            finished: response.finished,
        }
    }
}

/// `GET /bootstrap-static/` payload, reduced to the events list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapStatic {
    #[serde(default)]
    pub events: Vec<EventResponse>,
}

impl BootstrapStatic {
    /// The gameweek flagged as current, if the season has started
    pub fn current_event(&self) -> Option<Event> {
        self.events
            .iter()
            .find(|e| e.is_current)
            .cloned()
            .map(Event::from)
    }

    /// All gameweeks as stored records
    pub fn into_events(self) -> Vec<Event> {
        self.events.into_iter().map(Event::from).collect()
    }
}
