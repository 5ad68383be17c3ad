/// Metrics and telemetry for the Breakwater risk engine
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Signal ingestion volume
/// - Score calculations and enforcement actions
/// - Alert fan-out outcomes
/// - Batch recalculation runs
/// - Cache hit/miss rates and background jobs
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Encoder, Gauge, Histogram, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Active HTTP requests
    pub static ref HTTP_REQUESTS_ACTIVE: IntGauge = register_int_gauge!(
        "http_requests_active",
        "Number of HTTP requests currently being processed"
    )
    .unwrap();

    // ========== Signal Metrics ==========

    /// Ingested risk signals by signal type
    pub static ref SIGNALS_INGESTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "signals_ingested_total",
        "Total number of risk signals ingested",
        &["signal_type"]
    )
    .unwrap();

    // ========== Scoring Metrics ==========

    /// Risk score calculations by resulting tier
    pub static ref SCORE_CALCULATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "risk_score_calculations_total",
        "Total number of risk score calculations",
        &["tier"]
    )
    .unwrap();

    /// Score calculation duration in seconds
    pub static ref SCORE_CALCULATION_DURATION_SECONDS: Histogram = register_histogram!(
        "risk_score_calculation_duration_seconds",
        "Risk score calculation time in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap();

    // ========== Enforcement Metrics ==========

    /// Enforcement actions applied by action type
    pub static ref ENFORCEMENT_ACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "enforcement_actions_total",
        "Total number of enforcement actions applied",
        &["action_type"]
    )
    .unwrap();

    /// Appeal resolutions by outcome
    pub static ref APPEALS_RESOLVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "appeals_resolved_total",
        "Total number of appeals resolved",
        &["outcome"]
    )
    .unwrap();

    // ========== Alerting Metrics ==========

    /// Alerts raised by priority and source
    pub static ref ALERTS_RAISED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "alerts_raised_total",
        "Total number of alerts raised",
        &["priority", "source"]
    )
    .unwrap();

    /// Alert channel deliveries by channel and outcome
    pub static ref ALERT_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "alert_deliveries_total",
        "Total number of alert channel deliveries",
        &["channel", "status"]
    )
    .unwrap();

    // ========== Batch Metrics ==========

    /// Completed batch recalculation runs
    pub static ref RECALC_RUNS_TOTAL: IntCounter = register_int_counter!(
        "recalc_runs_total",
        "Total number of batch recalculation runs"
    )
    .unwrap();

    /// Users processed by batch recalculation, by outcome
    pub static ref RECALC_USERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "recalc_users_total",
        "Total number of users processed by batch recalculation",
        &["status"]
    )
    .unwrap();

    // ========== Cache Metrics ==========

    /// Cache hits by cache type
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_hits_total",
        "Total number of cache hits",
        &["cache_type"]
    )
    .unwrap();

    /// Cache misses by cache type
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_misses_total",
        "Total number of cache misses",
        &["cache_type"]
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
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    // ========== Error Metrics ==========

    /// Errors by error type
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "errors_total",
        "Total number of errors",
        &["error_type", "module"]
    )
    .unwrap();

    // ========== System Metrics ==========

    /// Application uptime in seconds
    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "uptime_seconds",
        "Application uptime in seconds"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record an ingested signal
pub fn record_signal_ingested(signal_type: &str) {
    SIGNALS_INGESTED_TOTAL
        .with_label_values(&[signal_type])
        .inc();
}

/// Record a risk score calculation
pub fn record_score_calculation(tier: &str, duration: f64) {
    SCORE_CALCULATIONS_TOTAL.with_label_values(&[tier]).inc();
    SCORE_CALCULATION_DURATION_SECONDS.observe(duration);
}

/// Record an applied enforcement action
pub fn record_enforcement_action(action_type: &str) {
    ENFORCEMENT_ACTIONS_TOTAL
        .with_label_values(&[action_type])
        .inc();
}

/// Record an appeal resolution
pub fn record_appeal_resolution(outcome: &str) {
    APPEALS_RESOLVED_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a raised alert
pub fn record_alert_raised(priority: &str, source: &str) {
    ALERTS_RAISED_TOTAL
        .with_label_values(&[priority, source])
        .inc();
}

/// Record an alert channel delivery attempt
pub fn record_alert_delivery(channel: &str, success: bool) {
    ALERT_DELIVERIES_TOTAL
        .with_label_values(&[channel, if success { "sent" } else { "failed" }])
        .inc();
}

/// Record a completed batch recalculation run
pub fn record_recalc_run(succeeded: usize, failed: usize) {
    RECALC_RUNS_TOTAL.inc();
    RECALC_USERS_TOTAL
        .with_label_values(&["succeeded"])
        .inc_by(succeeded as u64);
    RECALC_USERS_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as u64);
}

/// Record a cache access
pub fn record_cache_access(cache_type: &str, hit: bool) {
    if hit {
        CACHE_HITS_TOTAL.with_label_values(&[cache_type]).inc();
    } else {
        CACHE_MISSES_TOTAL.with_label_values(&[cache_type]).inc();
    }
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

/// Record an error
pub fn record_error(error_type: &str, module: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, module])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/api/users/:id/score", 200, 0.05);
        let metrics = render_metrics();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_record_scoring_pipeline() {
        record_signal_ingested("contact_phone");
        record_score_calculation("medium", 0.004);
        record_enforcement_action("soft_warning");
        let metrics = render_metrics();
        assert!(metrics.contains("signals_ingested_total"));
        assert!(metrics.contains("risk_score_calculations_total"));
        assert!(metrics.contains("enforcement_actions_total"));
    }

    #[test]
    fn test_record_alert_delivery_outcomes() {
        record_alert_raised("high", "threshold");
        record_alert_delivery("email", true);
        record_alert_delivery("chat", false);
        let metrics = render_metrics();
        assert!(metrics.contains("alerts_raised_total"));
        assert!(metrics.contains("alert_deliveries_total"));
    }

    #[test]
    fn test_record_recalc_run() {
        record_recalc_run(48, 2);
        let metrics = render_metrics();
        assert!(metrics.contains("recalc_runs_total"));
        assert!(metrics.contains("recalc_users_total"));
    }

    #[test]
    fn test_record_cache_access() {
        record_cache_access("latest_score", true);
        record_cache_access("latest_score", false);
        let metrics = render_metrics();
        assert!(metrics.contains("cache_hits_total"));
        assert!(metrics.contains("cache_misses_total"));
    }

    #[test]
    fn test_metrics_rendering() {
        record_http_request("GET", "/test", 200, 0.05);
        record_background_job("stale_score_refresh", "success", 1.5);

        let metrics = render_metrics();
        assert!(metrics.contains("# HELP") || !metrics.is_empty());
        assert!(metrics.contains("background_jobs_total"));
    }
}
