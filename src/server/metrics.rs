use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all CMS MCP metrics
const PREFIX: &str = "cms_mcp";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Session Metrics
    pub static ref ACTIVE_SESSIONS: Gauge = Gauge::new(
        format!("{PREFIX}_active_sessions"),
        "Number of live MCP sessions"
    ).expect("Failed to create active_sessions metric");

    pub static ref SESSIONS_CREATED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_sessions_created_total"),
        "Total MCP sessions created"
    ).expect("Failed to create sessions_created_total metric");

    pub static ref SESSIONS_REJECTED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_sessions_rejected_total"),
        "New sessions rejected because the session ceiling was reached"
    ).expect("Failed to create sessions_rejected_total metric");

    pub static ref SESSIONS_REAPED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_sessions_reaped_total"),
        "Sessions removed by the idle sweep"
    ).expect("Failed to create sessions_reaped_total metric");

    // Error Metrics
    pub static ref REQUEST_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_request_failures_total"), "Failed transport delegations"),
        &["operation", "reason"]
    ).expect("Failed to create request_failures_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_SESSIONS.clone()));
    let _ = REGISTRY.register(Box::new(SESSIONS_CREATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SESSIONS_REJECTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SESSIONS_REAPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REQUEST_FAILURES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

/// Update live session count
pub fn set_active_sessions(count: usize) {
    ACTIVE_SESSIONS.set(count as f64);
}

pub fn record_session_created() {
    SESSIONS_CREATED_TOTAL.inc();
}

pub fn record_session_rejected() {
    SESSIONS_REJECTED_TOTAL.inc();
}

pub fn record_sessions_reaped(count: usize) {
    SESSIONS_REAPED_TOTAL.inc_by(count as f64);
}

/// Record a failed, timed out or panicked transport delegation
pub fn record_request_failure(operation: &str, reason: &str) {
    REQUEST_FAILURES_TOTAL
        .with_label_values(&[operation, reason])
        .inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
