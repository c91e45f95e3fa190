/// Prometheus metrics for the chat server
///
/// Covers realtime fan-out, message persistence, token refresh and
/// background jobs. Exposed in text format at `/metrics`.

use crate::error::{ChatError, ChatResult};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Realtime Metrics ==========

    /// Open realtime connections
    pub static ref REALTIME_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "realtime_connections_active",
        "Number of open realtime connections"
    )
    .unwrap();

    /// Users with at least one open connection
    pub static ref REALTIME_USERS_ONLINE: IntGauge = register_int_gauge!(
        "realtime_users_online",
        "Number of users currently online"
    )
    .unwrap();

    /// Events handed to connection outboxes, by event name
    pub static ref REALTIME_EVENTS_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "realtime_events_published_total",
        "Total number of realtime events delivered to connection outboxes",
        &["event"]
    )
    .unwrap();

    /// Events dropped because a connection outbox was full or closed
    pub static ref REALTIME_EVENTS_DROPPED_TOTAL: IntCounter = register_int_counter!(
        "realtime_events_dropped_total",
        "Total number of realtime events dropped for slow or closed connections"
    )
    .unwrap();

    // ========== Ledger Metrics ==========

    /// Persisted messages by kind (direct, group)
    pub static ref MESSAGES_PERSISTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "messages_persisted_total",
        "Total number of messages written to the ledger",
        &["kind"]
    )
    .unwrap();

    // ========== Session Metrics ==========

    /// Refresh token exchanges by outcome
    pub static ref TOKEN_REFRESH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "token_refresh_total",
        "Total number of refresh token exchanges",
        &["outcome"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> ChatResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ChatError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ChatError::Internal(format!("Metrics are not valid UTF-8: {}", e)))
}

/// Record an event handed to a connection outbox
pub fn record_event_published(event: &str) {
    REALTIME_EVENTS_PUBLISHED_TOTAL
        .with_label_values(&[event])
        .inc();
}

/// Record an event that could not be queued
pub fn record_event_dropped() {
    REALTIME_EVENTS_DROPPED_TOTAL.inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_event_published() {
        record_event_published("receiveMessage");
        record_event_dropped();
        let metrics = render_metrics().unwrap();
        assert!(metrics.contains("realtime_events_published_total"));
        assert!(metrics.contains("realtime_events_dropped_total"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("revocation_cleanup", "success", 0.2);
        let metrics = render_metrics().unwrap();
        assert!(metrics.contains("background_jobs_total"));
        assert!(metrics.contains("background_job_duration_seconds"));
    }

    #[test]
    fn test_metrics_rendering() {
        MESSAGES_PERSISTED_TOTAL.with_label_values(&["direct"]).inc();
        TOKEN_REFRESH_TOTAL.with_label_values(&["success"]).inc();

        let metrics = render_metrics().unwrap();
        assert!(metrics.contains("# HELP"));
        assert!(metrics.contains("# TYPE"));
        assert!(metrics.contains("messages_persisted_total"));
        assert!(metrics.contains("token_refresh_total"));
    }
}
