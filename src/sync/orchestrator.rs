//! Batch sync orchestrator
//!
//! Drives one [`SyncJob`] over its entity list, isolating per-entity
//! failures, and hands the failed subset to a [`JobSink`] as the next
//! retry generation while `retry_count < max_retry_cycles`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::SyncConfig;
use crate::database::Database;
use crate::error::SyncError;
use crate::models::{EntityId, SyncRun};
use crate::otel::Metrics;

use super::job::{JobState, SyncJob, SyncOutcome, SyncUnit, WorkflowContext};

/// Domain sync function for one entity type
///
/// Implementations must be idempotent: the same id may be synced in
/// several retry generations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntitySync: Send + Sync {
    async fn sync(&self, entity_id: EntityId, event_context: Option<i32>) -> Result<(), SyncError>;
}

/// Source of "all known entities" for jobs without an explicit list
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    async fn all_entity_ids(&self) -> Result<Vec<EntityId>, SyncError>;
}

/// Accepts follow-up jobs
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn submit(&self, job: SyncJob) -> Result<(), SyncError>;
}

/// Runs sync jobs to completion
pub struct SyncOrchestrator {
    syncer: Arc<dyn EntitySync>,
    directory: Arc<dyn EntityDirectory>,
    sink: Arc<dyn JobSink>,
    history: Option<Arc<dyn Database>>,
    metrics: Option<Arc<Metrics>>,
    max_retry_cycles: u32,
    concurrency: usize,
}

impl SyncOrchestrator {
    pub fn new(
        syncer: Arc<dyn EntitySync>,
        directory: Arc<dyn EntityDirectory>,
        sink: Arc<dyn JobSink>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            syncer,
            directory,
            sink,
            history: None,
            metrics: None,
            max_retry_cycles: config.max_retry_cycles,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Persist a [`SyncRun`] row after every job
    pub fn with_history(mut self, db: Arc<dyn Database>) -> Self {
        self.history = Some(db);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_retry_cycles(&self) -> u32 {
        self.max_retry_cycles
    }

    /// Execute a job and return its aggregate outcome
    ///
    /// Never fails: per-entity errors are logged and counted, residual
    /// failures either become a follow-up job or are logged as terminal.
    pub async fn run_sync_job(&self, job: SyncJob) -> SyncOutcome {
        let ctx = WorkflowContext::new();
        let span = info_span!(
            "sync_job",
            workflow_id = %ctx.workflow_id,
            source = %job.source,
            retry_count = job.retry_count
        );

        self.execute(job, ctx).instrument(span).await
    }

    async fn execute(&self, job: SyncJob, ctx: WorkflowContext) -> SyncOutcome {
        debug!(state = %JobState::Received, "Sync job received");

        let entity_ids = match &job.entity_ids {
            Some(ids) => ids.clone(),
            None => match self.directory.all_entity_ids().await {
                Ok(ids) => ids,
                Err(e) => {
                    error!(error = %e, "Failed to resolve entity list, nothing to sync");
                    return SyncOutcome::default();
                }
            },
        };

        info!(state = %JobState::Running, entities = entity_ids.len(), "Sync job running");

        let units = job.units(&entity_ids);
        let outcome = if self.concurrency > 1 && units.len() > 1 {
            self.run_concurrent(units).await
        } else {
            self.run_sequential(units).await
        };

        let state = self.settle(&job, &outcome).await;
        info!(
            state = %state,
            total = outcome.total,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            elapsed_secs = ctx.elapsed_secs(),
            "Sync job finished"
        );

        self.record(&job, &ctx, &outcome).await;
        outcome
    }

    async fn run_sequential(&self, units: Vec<SyncUnit>) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        for unit in units {
            let result = sync_isolated(self.syncer.clone(), unit).await;
            tally(&mut outcome, unit.entity_id, result);
        }
        outcome
    }

    async fn run_concurrent(&self, units: Vec<SyncUnit>) -> SyncOutcome {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for unit in units {
            let semaphore = semaphore.clone();
            let syncer = self.syncer.clone();
            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    (unit.entity_id, sync_isolated(syncer, unit).await)
                }
                .instrument(Span::current()),
            );
        }

        let mut outcome = SyncOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((entity_id, result)) => tally(&mut outcome, entity_id, result),
                // sync_isolated already contains panics of the entity task
                Err(e) => error!(error = %e, "Entity worker task failed"),
            }
        }
        outcome
    }

    /// Decide the job's terminal state and schedule the next generation
    async fn settle(&self, job: &SyncJob, outcome: &SyncOutcome) -> JobState {
        let Some(failure) = outcome.partial_failure() else {
            return JobState::Completed;
        };

        warn!(
            state = %JobState::PartiallyFailed,
            failed_ids = ?failure.failed_ids,
            "{}",
            failure
        );

        if job.retry_count >= self.max_retry_cycles {
            error!(
                state = %JobState::Exhausted,
                failed_ids = ?failure.failed_ids,
                max_retry_cycles = self.max_retry_cycles,
                "Retry cycles exhausted, giving up on failed entities"
            );
            return JobState::Exhausted;
        }

        let next = job.follow_up(failure.failed_ids);
        let retry_count = next.retry_count;
        match self.sink.submit(next).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_retry_job(retry_count);
                }
                info!(next_retry_count = retry_count, "Retry job enqueued");
                JobState::RetryScheduled
            }
            Err(e) => {
                error!(error = %e, "Failed to enqueue retry job");
                JobState::Exhausted
            }
        }
    }

    async fn record(&self, job: &SyncJob, ctx: &WorkflowContext, outcome: &SyncOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_sync_job(
                &job.source.to_string(),
                outcome.succeeded,
                outcome.failed,
                ctx.elapsed_secs(),
            );
        }

        let Some(db) = &self.history else {
            return;
        };

        let run = SyncRun {
            id: None,
            workflow_id: ctx.workflow_id.clone(),
            source: job.source,
            retry_count: job.retry_count,
            total: outcome.total,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            failed_ids: outcome.failed_ids.clone(),
            started_at: ctx.start_time,
            finished_at: Utc::now(),
        };

        if let Err(e) = db.record_sync_run(&run).await {
            warn!(error = %e, "Failed to record sync run");
        }
    }
}

/// Run one entity's sync on its own task so a panic stays contained
async fn sync_isolated(syncer: Arc<dyn EntitySync>, unit: SyncUnit) -> Result<(), SyncError> {
    let task = tokio::spawn(
        async move { syncer.sync(unit.entity_id, unit.event_context).await }
            .instrument(Span::current()),
    );

    match task.await {
        Ok(result) => result,
        Err(e) => Err(SyncError::Aborted(e.to_string())),
    }
}

fn tally(outcome: &mut SyncOutcome, entity_id: EntityId, result: Result<(), SyncError>) {
    match result {
        Ok(()) => {
            debug!(entity_id, "Entity synced");
            outcome.record_success();
        }
        Err(e) => {
            warn!(entity_id, error = %e, "Entity sync failed");
            outcome.record_failure(entity_id);
        }
    }
}
