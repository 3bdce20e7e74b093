//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Incoming pipeline
    pub static ref MENTIONS_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustmention_mentions_received_total", "Incoming webmention notifications received"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref MENTIONS_VERIFIED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustmention_mentions_verified_total", "Incoming mentions run through verification"),
        &["result"]
    ).expect("metric can be created");

    // Outgoing pipeline
    pub static ref OUTGOING_SUBMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustmention_outgoing_submissions_total", "Outbound webmention submission attempts"),
        &["outcome"]
    ).expect("metric can be created");

    // Scheduler
    pub static ref PENDING_INCOMING: IntGauge = IntGauge::new(
        "rustmention_pending_incoming",
        "Pending incoming mentions awaiting processing"
    ).expect("metric can be created");
    pub static ref PENDING_OUTGOING: IntGauge = IntGauge::new(
        "rustmention_pending_outgoing",
        "Pending outgoing scans awaiting processing"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustmention_errors_total", "Total number of errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

static INIT: std::sync::Once = std::sync::Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn init_metrics() {
    INIT.call_once(register_all);
}

fn register_all() {
    REGISTRY
        .register(Box::new(MENTIONS_RECEIVED_TOTAL.clone()))
        .expect("MENTIONS_RECEIVED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(MENTIONS_VERIFIED_TOTAL.clone()))
        .expect("MENTIONS_VERIFIED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(OUTGOING_SUBMISSIONS_TOTAL.clone()))
        .expect("OUTGOING_SUBMISSIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PENDING_INCOMING.clone()))
        .expect("PENDING_INCOMING can be registered");
    REGISTRY
        .register(Box::new(PENDING_OUTGOING.clone()))
        .expect("PENDING_OUTGOING can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
