//! OpenTelemetry integration for fpl-sync
//!
//! This module provides observability through OpenTelemetry, including
//! tracing and metrics export to OTLP endpoints, plus the per-request
//! record the upstream client emits for every attempt.

use std::time::Duration;

use crate::config::{LoggingConfig, OtelConfig};
use crate::error::HttpFailureKind;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Outcome of one upstream attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    /// Request path as given by the caller
    pub path: String,
    /// HTTP method
    pub method: String,
    /// 1-indexed attempt number within the retry loop
    pub attempt: u32,
    /// Time from send to classified result
    pub duration: Duration,
    /// Response status, when a response was received
    pub status: Option<u16>,
    /// Failure class, when the attempt failed
    pub error: Option<HttpFailureKind>,
}

/// Sink for per-attempt request records
pub trait RequestRecorder: Send + Sync {
    /// Record one attempt
    fn record_request(&self, record: &RequestRecord);
}

/// OpenTelemetry provider for fpl-sync
///
/// Manages tracing and metrics providers with OTLP export capability.
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Create a new OtelProvider with the given configuration
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let (tracer_provider, meter_provider) = if config.enabled {
            let endpoint = config.endpoint.as_ref().ok_or_else(|| {
                OtelError::Config("OTLP endpoint is required when enabled".into())
            })?;

            let tracer_provider = Self::init_tracer_provider(endpoint, &resource)?;
            let meter_provider = Self::init_meter_provider(endpoint, &resource)?;

            (Some(tracer_provider), meter_provider)
        } else {
            // No reader attached: instruments are no-ops
            let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
            (None, meter_provider)
        };

        if let Some(ref tp) = tracer_provider {
            global::set_tracer_provider(tp.clone());
        }

        Ok(Self {
            tracer_provider,
            meter_provider,
            config: config.clone(),
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        let trace_config = Config::default()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource.clone());

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(trace_config)
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build())
    }

    /// Get a tracer from the provider
    pub fn tracer(&self, name: &'static str) -> opentelemetry_sdk::trace::Tracer {
        match self.tracer_provider {
            Some(ref tp) => tp.tracer(name),
            None => TracerProvider::builder().build().tracer(name),
        }
    }

    /// Get the meter for creating metrics
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    /// Check if OpenTelemetry is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Shutdown the OpenTelemetry providers gracefully
    pub fn shutdown(&self) -> Result<(), OtelError> {
        if let Err(e) = self.meter_provider.shutdown() {
            return Err(OtelError::Shutdown(format!(
                "Meter shutdown failed: {:?}",
                e
            )));
        }

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                if let Err(e) = result {
                    return Err(OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)));
                }
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Application metrics for fpl-sync
pub struct Metrics {
    /// Upstream attempts, by method and outcome
    pub upstream_requests_total: Counter<u64>,

    /// Upstream attempt duration in seconds
    pub upstream_duration: Histogram<f64>,

    /// Cache hits, by namespace
    pub cache_hits_total: Counter<u64>,

    /// Cache misses, by namespace
    pub cache_misses_total: Counter<u64>,

    /// Entities processed by sync jobs, by outcome
    pub sync_entities_total: Counter<u64>,

    /// Sync job duration in seconds
    pub sync_job_duration: Histogram<f64>,

    /// Follow-up retry jobs enqueued
    pub sync_retry_jobs_total: Counter<u64>,
}

impl Metrics {
    /// Create new metrics with the given meter
    pub fn new(meter: &Meter) -> Self {
        let upstream_requests_total = meter
            .u64_counter("fpl_sync_upstream_requests_total")
            .with_description("Total number of upstream request attempts")
            .init();

        let upstream_duration = meter
            .f64_histogram("fpl_sync_upstream_duration_seconds")
            .with_description("Upstream request attempt duration in seconds")
            .init();

        let cache_hits_total = meter
            .u64_counter("fpl_sync_cache_hits_total")
            .with_description("Total number of cache hits")
            .init();

        let cache_misses_total = meter
            .u64_counter("fpl_sync_cache_misses_total")
            .with_description("Total number of cache misses")
            .init();

        let sync_entities_total = meter
            .u64_counter("fpl_sync_entities_total")
            .with_description("Total number of entities processed by sync jobs")
            .init();

        let sync_job_duration = meter
            .f64_histogram("fpl_sync_job_duration_seconds")
            .with_description("Sync job duration in seconds")
            .init();

        let sync_retry_jobs_total = meter
            .u64_counter("fpl_sync_retry_jobs_total")
            .with_description("Total number of follow-up retry jobs enqueued")
            .init();

        Self {
            upstream_requests_total,
            upstream_duration,
            cache_hits_total,
            cache_misses_total,
            sync_entities_total,
            sync_job_duration,
            sync_retry_jobs_total,
        }
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self, namespace: &str) {
        self.cache_hits_total
            .add(1, &[KeyValue::new("namespace", namespace.to_string())]);
    }

    /// Record a cache miss
    pub fn record_cache_miss(&self, namespace: &str) {
        self.cache_misses_total
            .add(1, &[KeyValue::new("namespace", namespace.to_string())]);
    }

    /// Record the per-entity results of a finished sync job
    pub fn record_sync_job(&self, source: &str, succeeded: usize, failed: usize, duration_secs: f64) {
        self.sync_entities_total.add(
            succeeded as u64,
            &[
                KeyValue::new("source", source.to_string()),
                KeyValue::new("outcome", "succeeded"),
            ],
        );
        self.sync_entities_total.add(
            failed as u64,
            &[
                KeyValue::new("source", source.to_string()),
                KeyValue::new("outcome", "failed"),
            ],
        );
        self.sync_job_duration.record(
            duration_secs,
            &[KeyValue::new("source", source.to_string())],
        );
    }

    /// Record an enqueued follow-up job
    pub fn record_retry_job(&self, retry_count: u32) {
        self.sync_retry_jobs_total
            .add(1, &[KeyValue::new("retry_count", retry_count as i64)]);
    }
}

/// Path with numeric segments replaced by `{id}`, e.g. `/entry/{id}/`
pub fn route_template(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// `2xx`, `4xx`, ... or `none` when no response arrived
pub fn status_class(status: Option<u16>) -> String {
    match status {
        Some(code) => format!("{}xx", code / 100),
        None => "none".to_string(),
    }
}

impl RequestRecorder for Metrics {
    fn record_request(&self, record: &RequestRecord) {
        let outcome = match record.error {
            Some(kind) => kind.to_string(),
            None => "success".to_string(),
        };
        let route = route_template(&record.path);
        self.upstream_requests_total.add(
            1,
            &[
                KeyValue::new("method", record.method.clone()),
                KeyValue::new("route", route.clone()),
                KeyValue::new("status_class", status_class(record.status)),
                KeyValue::new("outcome", outcome),
            ],
        );
        self.upstream_duration.record(
            record.duration.as_secs_f64(),
            &[
                KeyValue::new("method", record.method.clone()),
                KeyValue::new("route", route),
            ],
        );
    }
}

/// Initialize tracing subscriber with OpenTelemetry integration
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let otel_layer = otel
        .is_enabled()
        .then(|| tracing_opentelemetry::layer().with_tracer(otel.tracer("fpl-sync")));

    let json = logging.format.eq_ignore_ascii_case("json");
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> OtelConfig {
        OtelConfig {
            enabled: false,
            endpoint: None,
            service_name: "test-service".to_string(),
        }
    }

    // Test 1: OtelProvider initialization with disabled config
    #[test]
    fn test_otel_provider_disabled() {
        let provider = OtelProvider::new(&disabled_config()).unwrap();

        assert!(!provider.is_enabled());
        assert!(provider.tracer_provider.is_none());
    }

    // Test 2: OtelProvider requires endpoint when enabled
    #[test]
    fn test_otel_provider_requires_endpoint_when_enabled() {
        let config = OtelConfig {
            enabled: true,
            ..disabled_config()
        };

        match OtelProvider::new(&config) {
            Err(OtelError::Config(msg)) => assert!(msg.contains("endpoint is required")),
            _ => panic!("Expected OtelError::Config"),
        }
    }

    // Test 3: Metrics creation and recording
    #[test]
    fn test_metrics_record() {
        let provider = OtelProvider::new(&disabled_config()).unwrap();
        let metrics = Metrics::new(&provider.meter());

        metrics.record_cache_hit("entry");
        metrics.record_cache_miss("event");
        metrics.record_sync_job("manual", 2, 1, 0.25);
        metrics.record_retry_job(1);
    }

    // Test 4: Metrics act as a request recorder
    #[test]
    fn test_metrics_request_recorder() {
        let provider = OtelProvider::new(&disabled_config()).unwrap();
        let recorder: Box<dyn RequestRecorder> = Box::new(Metrics::new(&provider.meter()));

        recorder.record_request(&RequestRecord {
            path: "/entry/1/".to_string(),
            method: "GET".to_string(),
            attempt: 1,
            duration: Duration::from_millis(40),
            status: Some(200),
            error: None,
        });
        recorder.record_request(&RequestRecord {
            path: "/entry/1/".to_string(),
            method: "GET".to_string(),
            attempt: 2,
            duration: Duration::from_millis(5),
            status: None,
            error: Some(HttpFailureKind::Timeout),
        });
    }

    // Test 5: Request attributes keep cardinality bounded
    #[test]
    fn test_request_attributes() {
        assert_eq!(route_template("/entry/123/"), "/entry/{id}/");
        assert_eq!(route_template("/entry/123/event/7/picks/"), "/entry/{id}/event/{id}/picks/");
        assert_eq!(route_template("/bootstrap-static/"), "/bootstrap-static/");
        assert_eq!(route_template("/v2x/"), "/v2x/");

        assert_eq!(status_class(Some(200)), "2xx");
        assert_eq!(status_class(Some(429)), "4xx");
        assert_eq!(status_class(Some(503)), "5xx");
        assert_eq!(status_class(None), "none");
    }

    // Test 6: Provider shutdown
    #[test]
    fn test_otel_provider_shutdown() {
        let provider = OtelProvider::new(&disabled_config()).unwrap();
        assert!(provider.shutdown().is_ok());
    }

    // Test 7: OtelError display
    #[test]
    fn test_otel_error_display() {
        let err = OtelError::Config("test error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test error");

        let err = OtelError::Shutdown("shutdown error".to_string());
        assert_eq!(err.to_string(), "Failed to shutdown: shutdown error");
    }

    // Test 8: Default OtelConfig
    #[test]
    fn test_default_otel_config() {
        let config = OtelConfig::default();

        assert!(!config.enabled);
        assert!(config.endpoint.is_none());
        assert_eq!(config.service_name, "fpl-sync");
    }
}
