//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    DISPATCHED_TOTAL, DISPATCH_FAILED_TOTAL, MAILS_ACCEPTED_TOTAL, MAILS_FAILED_TOTAL,
    QUEUE_DEPTH, RECIPIENTS_PER_REQUEST, TEMPLATE_CACHE_HITS_TOTAL, TEMPLATE_CACHE_MISSES_TOTAL,
    TRANSPORT_IN_FLIGHT,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording orchestrator metrics
pub struct SendMetrics;

impl SendMetrics {
    /// Record a mail accepted by the transport or the queue
    pub fn record_accepted(route: &str) {
        MAILS_ACCEPTED_TOTAL.with_label_values(&[route]).inc();
    }

    /// Record a per-recipient failure
    pub fn record_failed(reason: &str) {
        MAILS_FAILED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record the number of recipients of a request after expansion
    pub fn record_recipients(count: usize) {
        RECIPIENTS_PER_REQUEST.observe(count as f64);
    }
}

/// Helper struct for recording coordinator and transport metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_dispatched() {
        DISPATCHED_TOTAL.inc();
    }

    pub fn record_failed() {
        DISPATCH_FAILED_TOTAL.inc();
    }

    pub fn set_in_flight(count: usize) {
        TRANSPORT_IN_FLIGHT.set(count as i64);
    }

    pub fn set_queue_depth(depth: usize) {
        QUEUE_DEPTH.set(depth as i64);
    }
}

/// Helper struct for recording template cache metrics
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn record_hit(tier: &str) {
        TEMPLATE_CACHE_HITS_TOTAL.with_label_values(&[tier]).inc();
    }

    pub fn record_miss(tier: &str) {
        TEMPLATE_CACHE_MISSES_TOTAL.with_label_values(&[tier]).inc();
    }
}
