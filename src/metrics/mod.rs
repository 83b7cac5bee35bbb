//! Prometheus metrics for the mail service.
//!
//! - Send metrics (mails accepted per route, per-recipient failures)
//! - Dispatch metrics (queued mails handed to the transport)
//! - Template cache metrics (hits and misses per tier)
//! - Transport and queue gauges

mod helpers;

pub use helpers::{encode_metrics, CacheMetrics, DispatchMetrics, SendMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_mail";

lazy_static! {
    // ============================================================================
    // Send Metrics
    // ============================================================================

    /// Mails accepted by the orchestrator, by route (direct, queue)
    pub static ref MAILS_ACCEPTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_accepted_total", METRIC_PREFIX),
        "Mails accepted for delivery",
        &["route"]
    ).unwrap();

    /// Per-recipient send failures, by reason
    pub static ref MAILS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_failed_total", METRIC_PREFIX),
        "Per-recipient send failures",
        &["reason"]
    ).unwrap();

    /// Recipients per send request
    pub static ref RECIPIENTS_PER_REQUEST: Histogram = register_histogram!(
        format!("{}_recipients_per_request", METRIC_PREFIX),
        "Distribution of expanded recipients per send request",
        vec![1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0]
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Queued mails handed to the transport
    pub static ref DISPATCHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_dispatched_total", METRIC_PREFIX),
        "Queued mails handed to the transport"
    ).unwrap();

    /// Queued mails the transport failed to deliver
    pub static ref DISPATCH_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_dispatch_failed_total", METRIC_PREFIX),
        "Queued mails the transport failed to deliver"
    ).unwrap();

    /// Sends currently in flight on the pooled transport
    pub static ref TRANSPORT_IN_FLIGHT: IntGauge = register_int_gauge!(
        format!("{}_transport_in_flight", METRIC_PREFIX),
        "Sends currently in flight on the pooled transport"
    ).unwrap();

    /// Last observed queue depth
    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_queue_depth", METRIC_PREFIX),
        "Last observed number of mails waiting in the queue"
    ).unwrap();

    // ============================================================================
    // Template Cache Metrics
    // ============================================================================

    /// Template cache hits by tier (source, compiled)
    pub static ref TEMPLATE_CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_template_cache_hits_total", METRIC_PREFIX),
        "Template cache hits",
        &["tier"]
    ).unwrap();

    /// Template cache misses by tier (source, compiled)
    pub static ref TEMPLATE_CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_template_cache_misses_total", METRIC_PREFIX),
        "Template cache misses",
        &["tier"]
    ).unwrap();
}
