//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use fpl_sync::cache::{CacheStore, MemoryCache};
use fpl_sync::client::ResilientClient;
use fpl_sync::config::{HttpConfig, RateLimitConfig, RetryConfig, UpstreamConfig};
use fpl_sync::database::SqliteDatabase;
use fpl_sync::domain::{CurrentEventService, EntrySyncer};
use fpl_sync::models::{EntityId, EntryInfo};
use fpl_sync::otel::{RequestRecord, RequestRecorder};
use wiremock::MockServer;

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// HTTP settings with millisecond backoff and a generous token bucket
pub fn fast_http_config(max_attempts: u32) -> HttpConfig {
    HttpConfig {
        retry: RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_max_ms: 0,
            ..Default::default()
        },
        rate_limit: RateLimitConfig {
            capacity: 1000,
            tokens_per_interval: 1000,
            interval_ms: 1000,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Upstream settings pointing at a mock server
pub fn upstream_for(server: &MockServer) -> UpstreamConfig {
    UpstreamConfig {
        base_url: server.uri(),
        ..Default::default()
    }
}

/// Client against a mock server
pub fn create_test_client(server: &MockServer, http: &HttpConfig) -> Arc<ResilientClient> {
    Arc::new(
        ResilientClient::new(&upstream_for(server), http).expect("Failed to build test client"),
    )
}

/// Entry syncer over a mock upstream, an in-memory database and an in-memory cache
pub async fn create_test_syncer(
    server: &MockServer,
) -> (Arc<EntrySyncer>, Arc<SqliteDatabase>, Arc<MemoryCache>) {
    let db = create_test_database().await;
    let backend = Arc::new(MemoryCache::new());
    let cache = Arc::new(CacheStore::new(
        backend.clone(),
        "entry",
        Some(Duration::from_secs(60)),
    ));
    let syncer = Arc::new(EntrySyncer::new(
        create_test_client(server, &fast_http_config(2)),
        db.clone(),
        cache,
        "fpl",
    ));
    (syncer, db, backend)
}

/// Current gameweek service over a mock upstream, pinned to season 2425
pub fn create_test_event_service(
    server: &MockServer,
    db: Arc<SqliteDatabase>,
    backend: Arc<MemoryCache>,
) -> Arc<CurrentEventService> {
    let cache = CacheStore::new(backend, "event", Some(Duration::from_secs(60)));
    Arc::new(
        CurrentEventService::new(create_test_client(server, &fast_http_config(2)), db, cache, "fpl")
            .with_season("2425"),
    )
}

/// `/entry/{id}/` payload
pub fn entry_payload(id: EntityId, points: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": format!("Team {}", id),
        "player_first_name": "Test",
        "player_last_name": "Manager",
        "player_region_name": "England",
        "summary_overall_points": points,
        "summary_overall_rank": 1000 + id,
        "current_event": 12
    })
}

/// Stored entry record
pub fn sample_entry(id: EntityId) -> EntryInfo {
    EntryInfo {
        entry_id: id,
        entry_name: format!("Team {}", id),
        player_name: "Test Manager".to_string(),
        region: None,
        started_event: Some(1),
        overall_points: Some(50),
        overall_rank: None,
        bank: None,
        team_value: None,
        event_context: None,
        updated_at: Utc::now(),
    }
}

/// Recorder that keeps every attempt record
#[derive(Default)]
pub struct CollectingRecorder {
    records: Mutex<Vec<RequestRecord>>,
}

impl CollectingRecorder {
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl RequestRecorder for CollectingRecorder {
    fn record_request(&self, record: &RequestRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}
