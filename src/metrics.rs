/// Metrics and telemetry for Aurora Lens
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Firehose ingest volume and reconnects
/// - Records indexed vs rejected per collection
/// - Job queue throughput and depth
/// - DID resolution outcomes
/// - Tracked-set size

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

lazy_static! {
    // ========== Ingest Metrics ==========

    /// Firehose events taken off the wire, by event kind
    pub static ref FIREHOSE_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "firehose_events_total",
        "Total number of firehose events ingested",
        &["kind"]
    )
    .unwrap();

    /// Firehose reconnect attempts
    pub static ref FIREHOSE_RECONNECTS_TOTAL: IntCounter = register_int_counter!(
        "firehose_reconnects_total",
        "Total number of firehose reconnects"
    )
    .unwrap();

    // ========== Indexing Metrics ==========

    /// Records written to the index, by collection
    pub static ref RECORDS_INDEXED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "records_indexed_total",
        "Total number of records indexed",
        &["collection"]
    )
    .unwrap();

    /// Records dropped by policy or validation, by collection
    pub static ref RECORDS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "records_rejected_total",
        "Total number of records rejected without indexing",
        &["collection"]
    )
    .unwrap();

    // ========== Job Queue Metrics ==========

    /// Jobs completed successfully, by queue
    pub static ref JOBS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "jobs_processed_total",
        "Total number of jobs processed successfully",
        &["queue"]
    )
    .unwrap();

    /// Jobs that failed, timed out, or were dropped, by queue
    pub static ref JOBS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "jobs_failed_total",
        "Total number of job failures",
        &["queue"]
    )
    .unwrap();

    /// Pending jobs per queue
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "queue_depth",
        "Number of pending jobs per queue",
        &["queue"]
    )
    .unwrap();

    // ========== Identity Metrics ==========

    /// DID resolution outcomes
    pub static ref DID_RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "did_resolutions_total",
        "Total number of DID resolutions",
        &["status"]
    )
    .unwrap();

    // ========== Tracked Set Metrics ==========

    /// Size of the tracked actor set
    pub static ref TRACKED_ACTORS: IntGauge = register_int_gauge!(
        "tracked_actors",
        "Number of actors currently tracked"
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

/// Record a firehose event arrival
pub fn event_ingested(kind: &str) {
    FIREHOSE_EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a firehose reconnect
pub fn firehose_reconnect() {
    FIREHOSE_RECONNECTS_TOTAL.inc();
}

/// Record a successfully indexed record
pub fn record_indexed(collection: &str) {
    RECORDS_INDEXED_TOTAL.with_label_values(&[collection]).inc();
}

/// Record a record dropped without indexing
pub fn record_rejected(collection: &str) {
    RECORDS_REJECTED_TOTAL
        .with_label_values(&[collection])
        .inc();
}

/// Record a completed job
pub fn job_processed(queue: &str) {
    JOBS_PROCESSED_TOTAL.with_label_values(&[queue]).inc();
}

/// Record a failed, dropped, or timed-out job
pub fn job_failed(queue: &str) {
    JOBS_FAILED_TOTAL.with_label_values(&[queue]).inc();
}

/// Export the pending depth of a queue
pub fn set_queue_depth(queue: &str, depth: i64) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth);
}

/// Export the tracked-set size
pub fn set_tracked_actors(count: i64) {
    TRACKED_ACTORS.set(count);
}

/// Record a DID resolution outcome
pub fn did_resolved(success: bool) {
    DID_RESOLUTIONS_TOTAL
        .with_label_values(&[if success { "success" } else { "failure" }])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_counters() {
        record_indexed("app.bsky.feed.post");
        record_rejected("app.bsky.feed.like");
        let metrics = render_metrics();
        assert!(metrics.contains("records_indexed_total"));
        assert!(metrics.contains("records_rejected_total"));
    }

    #[test]
    fn test_job_counters() {
        job_processed("index");
        job_failed("fetch_record");
        let metrics = render_metrics();
        assert!(metrics.contains("jobs_processed_total"));
        assert!(metrics.contains("jobs_failed_total"));
    }

    #[test]
    fn test_queue_depth_gauge() {
        set_queue_depth("index", 42);
        set_tracked_actors(7);
        let metrics = render_metrics();
        assert!(metrics.contains("queue_depth"));
        assert!(metrics.contains("tracked_actors"));
    }

    #[test]
    fn test_metrics_rendering() {
        event_ingested("commit");
        did_resolved(true);
        did_resolved(false);

        let metrics = render_metrics();

        assert!(metrics.contains("# HELP"));
        assert!(metrics.contains("# TYPE"));
        assert!(metrics.contains("firehose_events_total"));
        assert!(metrics.contains("did_resolutions_total"));
    }
}
