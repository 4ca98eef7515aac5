//! Batch synchronization
//!
//! This module drives synchronization of many independent entities with
//! failure isolation and bounded retry generations.
//!
//! # Components
//!
//! - [`job`]: `SyncJob`, `SyncOutcome` and `WorkflowContext`
//! - [`orchestrator`]: runs one job and schedules its follow-up generation
//! - [`queue`]: bounded job queue, its worker, and an inline queue for one-shot runs
//! - [`scheduler`]: periodic full sync with jitter
//!
//! # Example
//!
//! ```ignore
//! use fpl_sync::sync::{SyncJob, SyncOrchestrator, SyncQueue, SyncWorker};
//!
//! let (queue, rx) = SyncQueue::channel(config.sync.queue_capacity);
//! let orchestrator = Arc::new(SyncOrchestrator::new(
//!     syncer.clone(),
//!     syncer,
//!     Arc::new(queue.clone()),
//!     &config.sync,
//! ));
//! tokio::spawn(SyncWorker::new(orchestrator, rx, shutdown_rx).run());
//!
//! queue.enqueue(Some(vec![1, 2, 3]), JobSource::Manual, 0).await?;
//! ```

pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;

// Re-export main types for convenience
pub use job::{JobState, SyncJob, SyncOutcome, SyncUnit, WorkflowContext};
pub use orchestrator::{EntityDirectory, EntitySync, JobSink, SyncOrchestrator};
pub use queue::{drain, InlineQueue, SyncQueue, SyncWorker};
pub use scheduler::{EventContextSource, SchedulerStatus, SyncScheduler};
