//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status
//! - Request intake, stage transitions and outcomes
//! - Interop root polling and block production nudges

use crate::chain::ChainKind;
use crate::coordination::RequestStatus;
use crate::error::{FinalizerError, FinalizerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "interop_finalizer_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain"]
    ).unwrap();

    // Request metrics
    pub static ref REQUESTS_ENQUEUED: CounterVec = register_counter_vec!(
        "interop_finalizer_requests_enqueued_total",
        "Total interop requests enqueued",
        &["chain"]
    ).unwrap();

    pub static ref STAGE_TRANSITIONS: CounterVec = register_counter_vec!(
        "interop_finalizer_stage_transitions_total",
        "Total request stage transitions by resulting status",
        &["chain", "status"]
    ).unwrap();

    pub static ref REQUESTS_FINALIZED: CounterVec = register_counter_vec!(
        "interop_finalizer_requests_finalized_total",
        "Total interop requests finalized",
        &["chain"]
    ).unwrap();

    pub static ref REQUESTS_FAILED: CounterVec = register_counter_vec!(
        "interop_finalizer_requests_failed_total",
        "Total interop requests failed",
        &["chain"]
    ).unwrap();

    pub static ref FINALIZATION_LATENCY: HistogramVec = register_histogram_vec!(
        "interop_finalizer_finalization_latency_seconds",
        "Time from enqueue to finalization",
        &["chain"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "interop_finalizer_queue_depth",
        "Requests waiting in a destination chain's queue",
        &["chain"]
    ).unwrap();

    // Target chain metrics
    pub static ref ROOT_POLLS: CounterVec = register_counter_vec!(
        "interop_finalizer_interop_root_polls_total",
        "Interop root reads by outcome",
        &["chain", "ingested"]
    ).unwrap();

    pub static ref BLOCK_PRODUCTION: CounterVec = register_counter_vec!(
        "interop_finalizer_block_production_total",
        "Forced block production attempts by outcome",
        &["chain", "success"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "interop_finalizer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "interop_finalizer_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> FinalizerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| FinalizerError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| FinalizerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Text exposition of every registered metric
pub fn render() -> FinalizerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| FinalizerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| FinalizerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain: &ChainKind, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[chain.as_str()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_request_enqueued(chain: &ChainKind) {
    REQUESTS_ENQUEUED.with_label_values(&[chain.as_str()]).inc();
}

pub fn record_transition(chain: &ChainKind, status: RequestStatus) {
    STAGE_TRANSITIONS
        .with_label_values(&[chain.as_str(), status.as_str()])
        .inc();
}

pub fn record_finalized(chain: &ChainKind, latency_secs: f64) {
    REQUESTS_FINALIZED.with_label_values(&[chain.as_str()]).inc();
    FINALIZATION_LATENCY
        .with_label_values(&[chain.as_str()])
        .observe(latency_secs);
}

pub fn record_failed(chain: &ChainKind) {
    REQUESTS_FAILED.with_label_values(&[chain.as_str()]).inc();
}

pub fn record_queue_depth(chain: &ChainKind, depth: usize) {
    QUEUE_DEPTH
        .with_label_values(&[chain.as_str()])
        .set(depth as f64);
}

pub fn record_root_poll(chain: &ChainKind, ingested: bool) {
    ROOT_POLLS
        .with_label_values(&[chain.as_str(), if ingested { "true" } else { "false" }])
        .inc();
}

pub fn record_block_production(chain: &ChainKind, success: bool) {
    BLOCK_PRODUCTION
        .with_label_values(&[chain.as_str(), if success { "true" } else { "false" }])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
