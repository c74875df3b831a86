//! Receipt polling and outcome classification
//!
//! A submitted transaction is resolved by polling `eth_getTransactionReceipt`
//! with exponential backoff until it is mined (optionally to a confirmation
//! depth), the deadline passes, or the caller cancels. Nothing is polled
//! after the deadline.

use super::{ChainClient, ClientError};
use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::outcome::{ReceiptSummary, TransactionOutcome};

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bound on replaying a reverted transaction to recover its reason
const REVERT_REASON_TIMEOUT: Duration = Duration::from_secs(5);

/// Polling behaviour of a `ReceiptWaiter`
#[derive(Debug, Clone)]
pub struct WaiterConfig {
    /// First delay between receipt polls
    pub initial_interval: Duration,
    /// Upper bound for the doubling delay
    pub max_interval: Duration,
    /// Blocks (including the inclusion block) required before reporting
    pub confirmations: u64,
}

impl WaiterConfig {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(config.poll_initial_ms),
            max_interval: Duration::from_millis(config.poll_max_ms),
            confirmations: config.confirmations,
        }
    }
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            confirmations: 1,
        }
    }
}

/// Waits for a submitted transaction to reach a terminal outcome
pub struct ReceiptWaiter {
    client: Arc<dyn ChainClient>,
    config: WaiterConfig,
}

impl ReceiptWaiter {
    pub fn new(client: Arc<dyn ChainClient>, config: WaiterConfig) -> Self {
        Self { client, config }
    }

    /// Poll until the transaction is mined, `timeout` elapses, or `cancel`
    /// flips to `true`.
    ///
    /// Cancellation only stops local work; the transaction may still be mined.
    pub async fn await_finality(
        &self,
        hash: H256,
        timeout: Duration,
        cancel: &watch::Receiver<bool>,
    ) -> TransactionOutcome {
        let mut cancel = cancel.clone();
        let deadline = Instant::now() + timeout;
        let mut interval = self.config.initial_interval;
        let mut attempts: u32 = 0;

        loop {
            if *cancel.borrow() {
                return cancelled(hash);
            }

            attempts += 1;
            crate::metrics::record_receipt_poll();
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Only the receipt lookup races the deadline
            match tokio::time::timeout(remaining, self.check(hash)).await {
                Ok(Ok(Some(receipt))) => {
                    info!("Transaction {:?} mined after {} polls", hash, attempts);
                    return self.classify(hash, &receipt).await;
                }
                Ok(Ok(None)) => {
                    debug!("Transaction {:?} not final yet (poll {})", hash, attempts);
                }
                Ok(Err(e)) => {
                    warn!("Receipt poll {} for {:?} failed: {}", attempts, hash, e);
                }
                Err(_) => return timed_out(hash, timeout),
            }

            let now = Instant::now();
            if now >= deadline {
                return timed_out(hash, timeout);
            }

            let delay = interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_cancelled(&mut cancel) => return cancelled(hash),
            }

            if Instant::now() >= deadline {
                return timed_out(hash, timeout);
            }
            interval = (interval * 2).min(self.config.max_interval);
        }
    }

    /// One poll. `Ok(None)` means keep waiting.
    async fn check(&self, hash: H256) -> Result<Option<TransactionReceipt>, ClientError> {
        let receipt = match self.client.transaction_receipt(hash).await? {
            Some(receipt) => receipt,
            None => return Ok(None),
        };

        // Some nodes return receipts for pending transactions
        let block = match receipt.block_number {
            Some(block) => block.as_u64(),
            None => return Ok(None),
        };

        if self.config.confirmations > 1 {
            let head = self.client.block_number().await?;
            let depth = head.saturating_sub(block) + 1;
            if depth < self.config.confirmations {
                debug!(
                    "Transaction {:?} has {} / {} confirmations",
                    hash, depth, self.config.confirmations
                );
                return Ok(None);
            }
        }

        Ok(Some(receipt))
    }

    async fn classify(&self, hash: H256, receipt: &TransactionReceipt) -> TransactionOutcome {
        match receipt.status.map(|s| s.as_u64()) {
            Some(0) => {
                let lookup = self.client.revert_reason(receipt);
                let reason = match tokio::time::timeout(REVERT_REASON_TIMEOUT, lookup).await {
                    Ok(Ok(reason)) => reason,
                    Ok(Err(e)) => {
                        warn!("Could not fetch revert reason for {:?}: {}", hash, e);
                        None
                    }
                    Err(_) => {
                        warn!("Revert reason lookup for {:?} timed out", hash);
                        None
                    }
                };
                TransactionOutcome::Reverted { hash, reason }
            }
            Some(_) => TransactionOutcome::Success {
                hash,
                receipt: ReceiptSummary::from(receipt),
            },
            None => {
                // Pre-Byzantium receipts carry no status
                warn!("Receipt for {:?} has no status field, assuming success", hash);
                TransactionOutcome::Success {
                    hash,
                    receipt: ReceiptSummary::from(receipt),
                }
            }
        }
    }
}

/// Resolves once the signal is `true`; never resolves if the sender is gone
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn timed_out(hash: H256, timeout: Duration) -> TransactionOutcome {
    ExecutorError::Timeout {
        operation: format!("receipt after {:?}", timeout),
        hash: Some(hash),
    }
    .into()
}

fn cancelled(hash: H256) -> TransactionOutcome {
    ExecutorError::Cancelled {
        operation: "receipt".to_string(),
        hash: Some(hash),
    }
    .into()
}
