//! Domain layer on top of the sync core
//!
//! - [`entry_sync`]: the entry sync function used by the orchestrator
//! - [`current_event`]: cached current-gameweek lookup

pub mod current_event;
pub mod entry_sync;

pub use current_event::{season_for, CurrentEventService};
pub use entry_sync::EntrySyncer;
