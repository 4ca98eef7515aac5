//! Periodic full-sync scheduler
//!
//! Enqueues a `cron` job over every known entity at a fixed interval,
//! with an initial delay and random jitter so several instances do not
//! hit the upstream at the same moment. When an [`EventContextSource`] is
//! attached, each job carries the gameweek current at enqueue time.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ScheduleConfig;
use crate::error::SyncError;
use crate::models::JobSource;

use super::job::SyncJob;
use super::queue::SyncQueue;

/// Resolves the gameweek that scheduled jobs run against
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventContextSource: Send + Sync {
    async fn current_event_id(&self) -> Result<Option<i32>, SyncError>;
}

/// Scheduler bookkeeping
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    /// Jobs enqueued so far
    pub jobs_enqueued: u64,
    /// When the last job was enqueued
    pub last_enqueued: Option<SystemTime>,
    /// Estimated next tick
    pub next_run: Option<SystemTime>,
    /// Last enqueue error
    pub last_error: Option<String>,
}

/// Periodic sync scheduler
pub struct SyncScheduler {
    config: ScheduleConfig,
    queue: SyncQueue,
    events: Option<Arc<dyn EventContextSource>>,
    status: Arc<RwLock<SchedulerStatus>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl SyncScheduler {
    pub fn new(config: ScheduleConfig, queue: SyncQueue, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            config,
            queue,
            events: None,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            shutdown_rx,
        }
    }

    /// Stamp each scheduled job with the current gameweek
    pub fn with_event_source(mut self, events: Arc<dyn EventContextSource>) -> Self {
        self.events = Some(events);
        self
    }

    /// Shared handle to the scheduler status
    pub fn status_handle(&self) -> Arc<RwLock<SchedulerStatus>> {
        self.status.clone()
    }

    pub async fn get_status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Run until shutdown is signalled or the queue closes
    pub async fn run(mut self) {
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        info!(
            interval_secs = interval.as_secs(),
            initial_delay_secs = self.config.initial_delay_secs,
            "Starting sync scheduler"
        );

        if self.config.initial_delay_secs > 0 {
            debug!(delay_secs = self.config.initial_delay_secs, "Waiting for initial delay");
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)) => {}
            }
        }

        info!("Enqueueing initial scheduled sync");
        if !self.tick(interval).await {
            return;
        }

        let mut timer = interval_at(Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    break;
                }
                _ = timer.tick() => {
                    let jitter = self.jitter();
                    if !jitter.is_zero() {
                        debug!(jitter_secs = jitter.as_secs(), "Delaying scheduled sync");
                        tokio::select! {
                            _ = self.shutdown_rx.recv() => {
                                info!("Shutdown signal received, stopping sync scheduler");
                                break;
                            }
                            _ = tokio::time::sleep(jitter) => {}
                        }
                    }

                    info!("Enqueueing scheduled sync");
                    if !self.tick(interval).await {
                        break;
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    fn jitter(&self) -> Duration {
        if self.config.jitter_secs > 0 {
            Duration::from_secs(rand::thread_rng().gen_range(0..self.config.jitter_secs))
        } else {
            Duration::ZERO
        }
    }

    /// Gameweek for the next job; lookup failures leave it unset
    async fn event_context(&self) -> Option<i32> {
        let events = self.events.as_ref()?;
        match events.current_event_id().await {
            Ok(event_id) => event_id,
            Err(e) => {
                warn!(error = %e, "Could not resolve current gameweek for scheduled sync");
                None
            }
        }
    }

    /// Enqueue one cron job; returns false once the queue is closed
    async fn tick(&self, interval: Duration) -> bool {
        let job = SyncJob::all(JobSource::Cron).with_event_context(self.event_context().await);
        debug!(event_context = job.event_context, "Scheduled sync job prepared");
        let result = self.queue.send(job).await;

        let mut status = self.status.write().await;
        status.next_run = Some(SystemTime::now() + interval);
        match result {
            Ok(()) => {
                status.jobs_enqueued += 1;
                status.last_enqueued = Some(SystemTime::now());
                status.last_error = None;
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to enqueue scheduled sync, stopping scheduler");
                status.last_error = Some(e.to_string());
                false
            }
        }
    }
}
