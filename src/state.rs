//! # Application State Management
//!
//! Shared state accessed concurrently by HTTP handlers, the WebSocket actors,
//! and the session pipelines: runtime configuration, service metrics, and the
//! interview session registry.
//!
//! Everything mutable sits behind `Arc<RwLock<_>>`: many readers or one
//! writer, never both. Handlers clone snapshots out of the locks rather than
//! holding them across awaits.

use crate::config::AppConfig;
use crate::interview::session::SessionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all request handlers and session actors.
#[derive(Clone)]
pub struct AppState {
    /// Runtime-updatable configuration
    pub config: Arc<RwLock<AppConfig>>,

    /// Service metrics, updated by the telemetry middleware and sessions
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Live and recently-ended interview sessions
    pub sessions: Arc<SessionRegistry>,

    /// When the server started (immutable)
    pub start_time: Instant,
}

/// Service-wide counters.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since start
    pub request_count: u64,

    /// Total failed requests since start
    pub error_count: u64,

    /// Interview sessions currently connected or initializing
    pub active_sessions: u32,

    /// Interviews started since server start
    pub interviews_started: u64,

    /// Interviews that reached evaluation since server start
    pub interviews_evaluated: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let sessions = Arc::new(SessionRegistry::new(
            config.performance.max_concurrent_sessions,
        ));
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions,
            start_time: Instant::now(),
        }
    }

    /// Snapshot of the current configuration. Cloning keeps the lock window
    /// short; `AppConfig` is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record one finished request against its endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A new interview session went live.
    pub fn session_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
        metrics.interviews_started += 1;
    }

    /// A session ended (for any reason). Guarded against underflow so a
    /// duplicate teardown notification cannot wrap the counter.
    pub fn session_ended(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// An evaluation completed successfully.
    pub fn interview_evaluated(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.interviews_evaluated += 1;
    }

    /// Consistent copy of the metrics for the health/metrics endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            interviews_started: metrics.interviews_started,
            interviews_evaluated: metrics.interviews_evaluated,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average processing time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters_track_lifecycle() {
        let state = AppState::new(AppConfig::default());

        state.session_started();
        state.session_started();
        state.session_ended();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.interviews_started, 2);

        // Duplicate end notifications never underflow
        state.session_ended();
        state.session_ended();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default());

        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.error_count, 1);
        assert!((metric.average_duration_ms() - 20.0).abs() < f64::EPSILON);
        assert!((metric.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_update_validates() {
        let state = AppState::new(AppConfig::default());

        let mut invalid = AppConfig::default();
        invalid.server.port = 0;
        assert!(state.update_config(invalid).is_err());

        let mut valid = AppConfig::default();
        valid.server.port = 9090;
        assert!(state.update_config(valid).is_ok());
        assert_eq!(state.get_config().server.port, 9090);
    }
}
