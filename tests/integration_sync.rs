//! Batch sync integration tests
//!
//! Tests the orchestrator driving the entry syncer against a mock upstream:
//! - Partial failure and the retry job it produces
//! - Bounded retry generations
//! - Batch idempotence against SQLite
//! - Queue worker and scheduler wiring

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fpl_sync::cache::CacheBackend;
use fpl_sync::config::{ScheduleConfig, SyncConfig};
use fpl_sync::database::Database;
use fpl_sync::error::SyncError;
use fpl_sync::models::JobSource;
use fpl_sync::sync::{
    drain, InlineQueue, JobSink, SyncJob, SyncOrchestrator, SyncOutcome, SyncQueue,
    SyncScheduler, SyncWorker,
};
use tokio::sync::{broadcast, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{create_test_event_service, create_test_syncer, entry_payload};

/// Sink that keeps submitted jobs for inspection
#[derive(Default)]
struct RecordingSink {
    jobs: Mutex<Vec<SyncJob>>,
}

#[async_trait]
impl JobSink for RecordingSink {
    async fn submit(&self, job: SyncJob) -> Result<(), SyncError> {
        self.jobs.lock().await.push(job);
        Ok(())
    }
}

async fn mount_entry(server: &MockServer, id: i64, points: i64) {
    Mock::given(method("GET"))
        .and(path(format!("/entry/{}/", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(entry_payload(id, points)))
        .mount(server)
        .await;
}

async fn mount_broken_entry(server: &MockServer, id: i64) {
    Mock::given(method("GET"))
        .and(path(format!("/entry/{}/", id)))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;
}

fn sync_config(max_retry_cycles: u32) -> SyncConfig {
    SyncConfig {
        max_retry_cycles,
        ..Default::default()
    }
}

/// Test 1: Entity 2 always failing yields {3, 2, 1, [2]} and a retry job for [2]
#[tokio::test]
async fn test_partial_failure_scenario() {
    let server = MockServer::start().await;
    mount_entry(&server, 1, 10).await;
    mount_broken_entry(&server, 2).await;
    mount_entry(&server, 3, 30).await;

    let (syncer, db, backend) = create_test_syncer(&server).await;
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = SyncOrchestrator::new(syncer.clone(), syncer, sink.clone(), &sync_config(2))
        .with_history(db.clone());

    let outcome = orchestrator
        .run_sync_job(SyncJob::new(Some(vec![1, 2, 3]), JobSource::Manual))
        .await;

    assert_eq!(
        outcome,
        SyncOutcome {
            total: 3,
            succeeded: 2,
            failed: 1,
            failed_ids: vec![2],
        }
    );

    let jobs = sink.jobs.lock().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].entity_ids, Some(vec![2]));
    assert_eq!(jobs[0].retry_count, 1);
    assert_eq!(jobs[0].source, JobSource::Manual);

    // Successful entities are committed despite the failure
    assert_eq!(db.list_entry_ids().await.unwrap(), vec![1, 3]);
    assert!(backend.exists("fpl:entry:1").await.unwrap());
    assert!(!backend.exists("fpl:entry:2").await.unwrap());

    let runs = db.recent_sync_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].failed_ids, vec![2]);
}

/// Test 2: A permanently broken entity produces exactly max_retry_cycles follow-ups
#[tokio::test]
async fn test_bounded_retry_generations() {
    let server = MockServer::start().await;
    mount_entry(&server, 1, 10).await;
    mount_broken_entry(&server, 2).await;

    let (syncer, db, _) = create_test_syncer(&server).await;
    let queue = Arc::new(InlineQueue::new());
    let orchestrator = SyncOrchestrator::new(syncer.clone(), syncer, queue.clone(), &sync_config(2))
        .with_history(db.clone());

    let outcomes = drain(
        &orchestrator,
        &queue,
        SyncJob::new(Some(vec![1, 2]), JobSource::Cron),
    )
    .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.last().unwrap().failed_ids, vec![2]);

    let mut retry_counts: Vec<u32> = db
        .recent_sync_runs(10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.retry_count)
        .collect();
    retry_counts.sort();
    assert_eq!(retry_counts, vec![0, 1, 2]);

    // Two attempts per pass for entity 2 (max_attempts = 2), three passes
    let requests = server.received_requests().await.unwrap();
    let broken = requests
        .iter()
        .filter(|r| r.url.path() == "/entry/2/")
        .count();
    assert_eq!(broken, 6);
}

/// Test 3: Running the same job twice leaves the same stored state
#[tokio::test]
async fn test_batch_idempotence() {
    let server = MockServer::start().await;
    for id in [4, 5, 6] {
        mount_entry(&server, id, id * 100).await;
    }

    let (syncer, db, _) = create_test_syncer(&server).await;
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = SyncOrchestrator::new(syncer.clone(), syncer, sink, &sync_config(2));

    let job = SyncJob::new(Some(vec![4, 5, 6]), JobSource::Manual);
    orchestrator.run_sync_job(job.clone()).await;
    let mut first = db.find_entries(&[4, 5, 6]).await.unwrap();

    orchestrator.run_sync_job(job).await;
    let mut second = db.find_entries(&[4, 5, 6]).await.unwrap();

    // Only the write timestamp may differ between runs
    for entry in first.iter_mut().chain(second.iter_mut()) {
        entry.updated_at = chrono::DateTime::<chrono::Utc>::default();
    }
    assert_eq!(first, second);
    assert_eq!(db.list_entry_ids().await.unwrap(), vec![4, 5, 6]);
}

/// Test 4: Jobs without ids cover every stored entry
#[tokio::test]
async fn test_all_known_entities() {
    let server = MockServer::start().await;
    mount_entry(&server, 7, 1).await;
    mount_entry(&server, 8, 2).await;

    let (syncer, db, _) = create_test_syncer(&server).await;
    db.upsert_entries(&[common::sample_entry(7), common::sample_entry(8)])
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let orchestrator = SyncOrchestrator::new(syncer.clone(), syncer, sink, &sync_config(2));

    let outcome = orchestrator.run_sync_job(SyncJob::all(JobSource::Cron)).await;

    assert_eq!(outcome.total, 2);
    assert!(outcome.is_complete());
    assert_eq!(db.find_entry(8).await.unwrap().unwrap().overall_points, Some(2));
}

/// Test 5: Concurrent processing isolates failures like sequential processing
#[tokio::test]
async fn test_concurrent_job() {
    let server = MockServer::start().await;
    for id in 1..=6 {
        if id % 3 == 0 {
            mount_broken_entry(&server, id).await;
        } else {
            mount_entry(&server, id, id).await;
        }
    }

    let (syncer, db, _) = create_test_syncer(&server).await;
    let sink = Arc::new(RecordingSink::default());
    let config = SyncConfig {
        max_retry_cycles: 1,
        concurrency: 3,
        ..Default::default()
    };
    let orchestrator = SyncOrchestrator::new(syncer.clone(), syncer, sink.clone(), &config);

    let outcome = orchestrator
        .run_sync_job(SyncJob::new(Some((1..=6).collect()), JobSource::Manual))
        .await;

    assert_eq!(outcome.total, 6);
    assert_eq!(outcome.succeeded, 4);
    let mut failed = outcome.failed_ids.clone();
    failed.sort();
    assert_eq!(failed, vec![3, 6]);
    assert_eq!(db.list_entry_ids().await.unwrap(), vec![1, 2, 4, 5]);
    assert_eq!(sink.jobs.lock().await.len(), 1);
}

/// Test 6: Scheduler, queue and worker run a full cron sync end to end
#[tokio::test]
async fn test_scheduler_worker_pipeline() {
    let server = MockServer::start().await;
    mount_entry(&server, 9, 90).await;

    let (syncer, db, _) = create_test_syncer(&server).await;
    db.upsert_entry(&common::sample_entry(9)).await.unwrap();

    let (queue, rx) = SyncQueue::channel(8);
    let orchestrator = Arc::new(
        SyncOrchestrator::new(syncer.clone(), syncer, Arc::new(queue.clone()), &sync_config(2))
            .with_history(db.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let worker = tokio::spawn(SyncWorker::new(orchestrator, rx, shutdown_tx.subscribe()).run());
    let schedule = ScheduleConfig {
        enabled: true,
        interval_secs: 3600,
        initial_delay_secs: 0,
        jitter_secs: 0,
    };
    let scheduler = tokio::spawn(SyncScheduler::new(schedule, queue, shutdown_tx.subscribe()).run());

    let mut synced = false;
    for _ in 0..50 {
        if db.find_entry(9).await.unwrap().unwrap().overall_points == Some(90) {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(synced);

    shutdown_tx.send(()).unwrap();
    scheduler.await.unwrap();
    assert_eq!(worker.await.unwrap(), 1);

    let runs = db.recent_sync_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].source, JobSource::Cron);
}

/// Test 7: Scheduled jobs in daemon mode record the current gameweek on synced rows
#[tokio::test]
async fn test_scheduled_sync_records_event_context() {
    let server = MockServer::start().await;
    mount_entry(&server, 11, 110).await;
    Mock::given(method("GET"))
        .and(path("/bootstrap-static/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "events": [
                {"id": 13, "name": "Gameweek 13", "finished": true},
                {"id": 14, "name": "Gameweek 14", "is_current": true}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (syncer, db, backend) = create_test_syncer(&server).await;
    db.upsert_entry(&common::sample_entry(11)).await.unwrap();
    let events = create_test_event_service(&server, db.clone(), backend);

    let (queue, rx) = SyncQueue::channel(8);
    let orchestrator = Arc::new(SyncOrchestrator::new(
        syncer.clone(),
        syncer,
        Arc::new(queue.clone()),
        &sync_config(2),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let worker = tokio::spawn(SyncWorker::new(orchestrator, rx, shutdown_tx.subscribe()).run());
    let schedule = ScheduleConfig {
        enabled: true,
        interval_secs: 3600,
        initial_delay_secs: 0,
        jitter_secs: 0,
    };
    let scheduler = tokio::spawn(
        SyncScheduler::new(schedule, queue, shutdown_tx.subscribe())
            .with_event_source(events)
            .run(),
    );

    let mut stored = None;
    for _ in 0..50 {
        let entry = db.find_entry(11).await.unwrap().unwrap();
        if entry.overall_points == Some(110) {
            stored = Some(entry);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(stored.unwrap().event_context, Some(14));
    assert_eq!(db.find_current_event("2425").await.unwrap().unwrap().event_id, 14);

    shutdown_tx.send(()).unwrap();
    scheduler.await.unwrap();
    assert_eq!(worker.await.unwrap(), 1);
}
