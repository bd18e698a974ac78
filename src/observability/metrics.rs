//! Metrics collection and exposition.
//!
//! # Metrics
//! - `prefetch_documents_total` (counter): observed documents by outcome
//! - `prefetch_fetches_total` (counter): speculative fetches by outcome
//! - `prefetch_pushes_total` (counter): pushes sent by outcome
//! - `prefetch_push_received_total` (counter): pushes received by outcome
//! - `prefetch_race_total` (counter): racing client resolutions by winner
//! - `prefetch_flying` (gauge): speculative fetches in flight
//! - `prefetch_cache_entries` (gauge): unconsumed pushes held client side
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Outcome labels are a closed set of static strings

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_document(outcome: &'static str) {
    metrics::counter!("prefetch_documents_total", "outcome" => outcome).increment(1);
}

pub fn record_fetch(outcome: &'static str) {
    metrics::counter!("prefetch_fetches_total", "outcome" => outcome).increment(1);
}

pub fn record_push_sent(outcome: &'static str) {
    metrics::counter!("prefetch_pushes_total", "outcome" => outcome).increment(1);
}

pub fn record_push_received(outcome: &'static str) {
    metrics::counter!("prefetch_push_received_total", "outcome" => outcome).increment(1);
}

pub fn record_race(winner: &'static str) {
    metrics::counter!("prefetch_race_total", "winner" => winner).increment(1);
}

pub fn set_flying(count: usize) {
    metrics::gauge!("prefetch_flying").set(count as f64);
}

pub fn set_cache_entries(count: usize) {
    metrics::gauge!("prefetch_cache_entries").set(count as f64);
}
