//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Submissions per backend
//! - Terminal outcomes by class
//! - Receipt polling
//! - End-to-end latency
//!
//! The CLI is short-lived, so metrics are written to a text file for the
//! node_exporter textfile collector instead of being served.

use crate::outcome::TransactionOutcome;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};
use std::path::Path;
use tracing::info;

lazy_static! {
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "tx_executor_transactions_submitted_total",
        "Total transactions accepted by a node",
        &["backend"]
    ).unwrap();

    pub static ref TX_OUTCOMES: CounterVec = register_counter_vec!(
        "tx_executor_outcomes_total",
        "Terminal outcomes by backend and class",
        &["backend", "outcome"]
    ).unwrap();

    pub static ref RECEIPT_POLLS: Counter = register_counter!(
        "tx_executor_receipt_polls_total",
        "Total receipt polls issued"
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "tx_executor_latency_seconds",
        "Time from build to terminal outcome",
        &["backend"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();
}

/// Render all registered metrics in the text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Write metrics atomically so a collector never reads a partial file
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, render())?;
    std::fs::rename(&tmp, path)?;
    info!("Metrics written to {}", path.display());
    Ok(())
}

// Helper functions to record metrics

pub fn record_tx_submitted(backend: &str) {
    TX_SUBMITTED.with_label_values(&[backend]).inc();
}

pub fn record_outcome(backend: &str, outcome: &TransactionOutcome, latency_secs: f64) {
    TX_OUTCOMES
        .with_label_values(&[backend, outcome.label()])
        .inc();
    TX_LATENCY
        .with_label_values(&[backend])
        .observe(latency_secs);
}

pub fn record_receipt_poll() {
    RECEIPT_POLLS.inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;

    #[test]
    fn test_textfile_contains_recorded_outcome() {
        let outcome = TransactionOutcome::Reverted {
            hash: H256::zero(),
            reason: None,
        };
        record_outcome("metrics-test", &outcome, 1.5);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tx_executor.prom");
        write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("tx_executor_outcomes_total"));
        assert!(text.contains("backend=\"metrics-test\""));
        assert!(!path.with_extension("prom.tmp").exists());
    }
}
