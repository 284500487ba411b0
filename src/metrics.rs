/// Metrics and telemetry for the Clubhouse backend
///
/// Prometheus counters for the auth state machine, the snapshot scheduler,
/// background jobs and HTTP traffic, rendered at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clubhouse_http_requests_total",
        "Total number of HTTP requests",
        &["method", "status"]
    )
    .expect("register clubhouse_http_requests_total");

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "clubhouse_http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("register clubhouse_http_request_duration_seconds");

    // ========== Auth Metrics ==========

    /// Signups by outcome (created, reactivated, duplicate)
    pub static ref SIGNUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clubhouse_signups_total",
        "Signup requests by outcome",
        &["outcome"]
    )
    .expect("register clubhouse_signups_total");

    /// Password step of login by outcome
    pub static ref LOGIN_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clubhouse_login_requests_total",
        "Login requests by outcome",
        &["outcome"]
    )
    .expect("register clubhouse_login_requests_total");

    /// OTP step of login by outcome
    pub static ref OTP_VERIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clubhouse_otp_verifications_total",
        "OTP verifications by outcome",
        &["outcome"]
    )
    .expect("register clubhouse_otp_verifications_total");

    /// Accounts locked after repeated failures
    pub static ref LOCKOUTS_TOTAL: IntCounter = register_int_counter!(
        "clubhouse_lockouts_total",
        "Accounts locked after repeated failed logins"
    )
    .expect("register clubhouse_lockouts_total");

    /// Sessions issued
    pub static ref SESSIONS_ISSUED_TOTAL: IntCounter = register_int_counter!(
        "clubhouse_sessions_issued_total",
        "Session tokens issued"
    )
    .expect("register clubhouse_sessions_issued_total");

    // ========== Committee Metrics ==========

    /// Snapshots taken by trigger (timer, catch_up, settings, fallback, manual)
    pub static ref SNAPSHOTS_TAKEN_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clubhouse_snapshots_taken_total",
        "Committee snapshots taken by trigger",
        &["trigger"]
    )
    .expect("register clubhouse_snapshots_taken_total");

    // ========== Background Job Metrics ==========

    /// Background job executions by type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clubhouse_background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .expect("register clubhouse_background_jobs_total");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method])
        .observe(duration);
}

/// Record a signup outcome
pub fn record_signup(outcome: &str) {
    SIGNUPS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a login request outcome
pub fn record_login_request(outcome: &str) {
    LOGIN_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record an OTP verification outcome
pub fn record_otp_verification(outcome: &str) {
    OTP_VERIFICATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record an account lockout
pub fn record_lockout() {
    LOCKOUTS_TOTAL.inc();
}

/// Record a session issuance
pub fn record_session_issued() {
    SESSIONS_ISSUED_TOTAL.inc();
}

/// Record a committee snapshot
pub fn record_snapshot(trigger: &str) {
    SNAPSHOTS_TAKEN_TOTAL.with_label_values(&[trigger]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
}
