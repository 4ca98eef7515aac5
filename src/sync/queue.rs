//! Job submission and consumption
//!
//! [`SyncQueue`] is the job-submission interface backed by a bounded
//! channel; [`SyncWorker`] consumes it one job at a time so retry
//! generations for the same trigger never overlap. [`InlineQueue`] is a
//! local queue for one-shot runs that drain their retries in-process.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::models::{EntityId, JobSource};

use super::job::{SyncJob, SyncOutcome};
use super::orchestrator::{JobSink, SyncOrchestrator};

/// Sending half of the job queue
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<SyncJob>,
}

impl SyncQueue {
    /// Create a queue and the receiver its worker consumes
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Submit a job for the given entities (`None` = all known entities)
    pub async fn enqueue(
        &self,
        entity_ids: Option<Vec<EntityId>>,
        source: JobSource,
        retry_count: u32,
    ) -> Result<(), SyncError> {
        let job = SyncJob::new(entity_ids, source).with_retry_count(retry_count);
        self.send(job).await
    }

    /// Submit a prepared job, waiting for queue capacity
    pub async fn send(&self, job: SyncJob) -> Result<(), SyncError> {
        debug!(source = %job.source, retry_count = job.retry_count, "Enqueueing sync job");
        self.tx.send(job).await.map_err(|_| SyncError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl JobSink for SyncQueue {
    /// Follow-ups are submitted from inside the worker, so a full queue
    /// must not block the only consumer
    async fn submit(&self, job: SyncJob) -> Result<(), SyncError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(SyncError::QueueClosed),
            Err(TrySendError::Full(job)) => {
                warn!(retry_count = job.retry_count, "Sync queue full, deferring retry job");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(job).await.is_err() {
                        warn!("Sync queue closed before deferred retry job was delivered");
                    }
                });
                Ok(())
            }
        }
    }
}

/// Consumes queued jobs until shutdown or until every sender is dropped
pub struct SyncWorker {
    orchestrator: Arc<SyncOrchestrator>,
    rx: mpsc::Receiver<SyncJob>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl SyncWorker {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        rx: mpsc::Receiver<SyncJob>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            orchestrator,
            rx,
            shutdown_rx,
        }
    }

    /// Run the worker loop; returns the number of jobs executed
    ///
    /// A job that has started always runs to completion before shutdown
    /// is observed.
    pub async fn run(mut self) -> usize {
        info!("Starting sync worker");
        let mut executed = 0;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync worker");
                    break;
                }
                job = self.rx.recv() => {
                    let Some(job) = job else {
                        debug!("Sync queue closed");
                        break;
                    };
                    self.orchestrator.run_sync_job(job).await;
                    executed += 1;
                }
            }
        }

        info!(jobs = executed, "Sync worker stopped");
        executed
    }
}

/// In-process queue for one-shot runs
#[derive(Default)]
pub struct InlineQueue {
    jobs: Mutex<VecDeque<SyncJob>>,
}

impl InlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<SyncJob> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobSink for InlineQueue {
    async fn submit(&self, job: SyncJob) -> Result<(), SyncError> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(job);
        Ok(())
    }
}

/// Run `job` and then every follow-up it produces, one generation at a time
///
/// `orchestrator` must submit its follow-ups to `queue`. Returns the
/// outcome of each generation in order.
pub async fn drain(
    orchestrator: &SyncOrchestrator,
    queue: &InlineQueue,
    job: SyncJob,
) -> Vec<SyncOutcome> {
    let mut outcomes = vec![orchestrator.run_sync_job(job).await];
    while let Some(next) = queue.pop() {
        outcomes.push(orchestrator.run_sync_job(next).await);
    }
    outcomes
}
