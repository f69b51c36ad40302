//! Prometheus metrics for crash matching and triage.
//!
//! - Signature searches by outcome and their latency
//! - Normalization failures by kind
//! - Bucket assignments and bucket creation
//! - Foreign-match analyses that hit the display cap
//!
//! # Example
//! ```no_run
//! use crash_triage::metrics::{gather_metrics, init_metrics, MATCH_QUERIES_TOTAL};
//!
//! init_metrics().unwrap();
//! MATCH_QUERIES_TOTAL.with_label_values(&["matched"]).inc();
//! println!("{}", gather_metrics());
//! ```

use lazy_static::lazy_static;
use prometheus::{CounterVec, Histogram, HistogramOpts, IntCounter, Opts, Registry};

const NAMESPACE: &str = "crash_triage";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Signature searches
    ///
    /// Labels: outcome (matched, similar, no_match, unbucketable)
    pub static ref MATCH_QUERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("match_queries_total", "Total number of signature searches")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create MATCH_QUERIES_TOTAL metric");

    /// Signature search duration in seconds
    pub static ref MATCH_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "match_duration_seconds",
            "Signature search duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
    ).expect("Failed to create MATCH_DURATION_SECONDS metric");

    /// Crashes that could not be normalized
    ///
    /// Labels: kind (missing_trace, corrupt_trace, no_usable_frames)
    pub static ref NORMALIZATION_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("normalization_failures_total", "Total number of unbucketable crashes")
            .namespace(NAMESPACE),
        &["kind"]
    ).expect("Failed to create NORMALIZATION_FAILURES_TOTAL metric");

    /// Crashes assigned to a bucket
    pub static ref ASSIGNMENTS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("assignments_total", "Total number of crash assignments")
            .namespace(NAMESPACE),
    ).expect("Failed to create ASSIGNMENTS_TOTAL metric");

    /// Buckets created
    pub static ref BUCKETS_CREATED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("buckets_created_total", "Total number of buckets created")
            .namespace(NAMESPACE),
    ).expect("Failed to create BUCKETS_CREATED_TOTAL metric");

    /// Foreign-match scans stopped at the display cap
    pub static ref FOREIGN_LIMIT_EXCEEDED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new(
            "foreign_limit_exceeded_total",
            "Total number of foreign-match analyses truncated at the display cap"
        )
        .namespace(NAMESPACE),
    ).expect("Failed to create FOREIGN_LIMIT_EXCEEDED_TOTAL metric");
}

/// Register all metrics with the global registry
///
/// Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MATCH_QUERIES_TOTAL.clone()),
        Box::new(MATCH_DURATION_SECONDS.clone()),
        Box::new(NORMALIZATION_FAILURES_TOTAL.clone()),
        Box::new(ASSIGNMENTS_TOTAL.clone()),
        Box::new(BUCKETS_CREATED_TOTAL.clone()),
        Box::new(FOREIGN_LIMIT_EXCEEDED_TOTAL.clone()),
    ];

    for collector in collectors {
        match PROMETHEUS_REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }

    tracing::debug!("Prometheus metrics initialized");
    Ok(())
}

/// Generate Prometheus text format metrics
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
