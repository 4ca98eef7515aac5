//! Sync job, outcome and workflow types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PartialBatchFailure;
use crate::models::{EntityId, JobSource};

/// One entity's sync request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncUnit {
    pub entity_id: EntityId,
    pub event_context: Option<i32>,
}

/// A batch of entity syncs, consumed exactly once by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Explicit targets; `None` means every known entity
    pub entity_ids: Option<Vec<EntityId>>,
    /// What triggered the job
    pub source: JobSource,
    /// Retry generation, 0 for the original trigger
    pub retry_count: u32,
    /// Gameweek the job is run for, if known
    #[serde(default)]
    pub event_context: Option<i32>,
    pub triggered_at: DateTime<Utc>,
}

impl SyncJob {
    /// Create a first-generation job
    pub fn new(entity_ids: Option<Vec<EntityId>>, source: JobSource) -> Self {
        Self {
            entity_ids,
            source,
            retry_count: 0,
            event_context: None,
            triggered_at: Utc::now(),
        }
    }

    /// Job over every known entity
    pub fn all(source: JobSource) -> Self {
        Self::new(None, source)
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_event_context(mut self, event_context: Option<i32>) -> Self {
        self.event_context = event_context;
        self
    }

    /// Next generation covering only `failed_ids`
    ///
    /// Source and event context are carried over; the original job is
    /// never resubmitted.
    pub fn follow_up(&self, failed_ids: Vec<EntityId>) -> Self {
        Self {
            entity_ids: Some(failed_ids),
            source: self.source,
            retry_count: self.retry_count + 1,
            event_context: self.event_context,
            triggered_at: Utc::now(),
        }
    }

    /// Units for the given resolved ids
    pub fn units(&self, entity_ids: &[EntityId]) -> Vec<SyncUnit> {
        entity_ids
            .iter()
            .map(|&entity_id| SyncUnit {
                entity_id,
                event_context: self.event_context,
            })
            .collect()
    }
}

/// Aggregate result of one job execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed ids in the order their syncs completed
    pub failed_ids: Vec<EntityId>,
}

impl SyncOutcome {
    /// Record one entity's success
    pub fn record_success(&mut self) {
        self.total += 1;
        self.succeeded += 1;
    }

    /// Record one entity's failure
    pub fn record_failure(&mut self, entity_id: EntityId) {
        self.total += 1;
        self.failed += 1;
        self.failed_ids.push(entity_id);
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// The failed subset, if any entity failed
    pub fn partial_failure(&self) -> Option<PartialBatchFailure> {
        if self.failed_ids.is_empty() {
            None
        } else {
            Some(PartialBatchFailure {
                total: self.total,
                failed_ids: self.failed_ids.clone(),
            })
        }
    }
}

/// Correlation data for one traceable operation
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub start_time: DateTime<Utc>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self {
            workflow_id: Uuid::new_v4().to_string(),
            start_time: Utc::now(),
        }
    }

    /// Wall time since the workflow started, in seconds
    pub fn elapsed_secs(&self) -> f64 {
        let elapsed = Utc::now() - self.start_time;
        elapsed.num_milliseconds().max(0) as f64 / 1000.0
    }
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a job inside the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Running,
    Completed,
    PartiallyFailed,
    RetryScheduled,
    Exhausted,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Received => write!(f, "received"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::PartiallyFailed => write!(f, "partially_failed"),
            JobState::RetryScheduled => write!(f, "retry_scheduled"),
            JobState::Exhausted => write!(f, "exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Follow-up jobs carry only failed ids and bump the generation
    #[test]
    fn test_follow_up_job() {
        let job = SyncJob::new(Some(vec![1, 2, 3]), JobSource::Cron).with_event_context(Some(7));
        let next = job.follow_up(vec![2]);

        assert_eq!(next.entity_ids, Some(vec![2]));
        assert_eq!(next.retry_count, 1);
        assert_eq!(next.source, JobSource::Cron);
        assert_eq!(next.event_context, Some(7));
        assert_eq!(job.retry_count, 0);
    }

    // Test 2: Outcome counters stay consistent
    #[test]
    fn test_outcome_counts() {
        let mut outcome = SyncOutcome::default();
        outcome.record_success();
        outcome.record_failure(2);
        outcome.record_success();

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failed_ids, vec![2]);
        assert!(!outcome.is_complete());

        let failure = outcome.partial_failure().unwrap();
        assert_eq!(failure.total, 3);
        assert_eq!(failure.failed_ids, vec![2]);
    }

    // Test 3: A clean outcome has no partial failure
    #[test]
    fn test_outcome_complete() {
        let mut outcome = SyncOutcome::default();
        outcome.record_success();

        assert!(outcome.is_complete());
        assert!(outcome.partial_failure().is_none());
    }

    // Test 4: Every workflow gets a distinct id
    #[test]
    fn test_workflow_context_ids() {
        let a = WorkflowContext::new();
        let b = WorkflowContext::new();

        assert_ne!(a.workflow_id, b.workflow_id);
        assert!(Uuid::parse_str(&a.workflow_id).is_ok());
        assert!(a.elapsed_secs() >= 0.0);
    }

    // Test 5: Units inherit the job's event context
    #[test]
    fn test_units() {
        let job = SyncJob::new(None, JobSource::Manual).with_event_context(Some(3));
        let units = job.units(&[10, 11]);

        assert_eq!(
            units,
            vec![
                SyncUnit { entity_id: 10, event_context: Some(3) },
                SyncUnit { entity_id: 11, event_context: Some(3) },
            ]
        );
    }
}
