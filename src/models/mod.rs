//! Domain models for fpl-sync
//!
//! This module contains the records synchronized from the upstream API and
//! the bookkeeping records of sync jobs.

pub mod entry;
pub mod event;
pub mod sync_run;

/// Upstream identifier of a synchronized entity (an FPL entry id)
pub type EntityId = i64;

// Re-export commonly used types
pub use entry::{EntryInfo, EntryResponse};
pub use event::{BootstrapStatic, Event, EventResponse};
pub use sync_run::{JobSource, SyncRun};
