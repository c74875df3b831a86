//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - One sequencing point per sender address
//! - Reading the nonce from the node while that point is held
//! - Skipping past our own submissions when the node lags behind them

use crate::chain::ChainClient;
use crate::error::{ExecutorError, ExecutorResult};

use dashmap::DashMap;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Per-sender nonce state
#[derive(Debug, Default)]
struct SenderState {
    /// Last nonce we broadcast for this sender
    last_submitted: Option<U256>,
}

/// Serializes nonce allocation per sender.
///
/// Share one instance (behind an `Arc`) between every backend that signs for
/// the same addresses.
#[derive(Debug, Default)]
pub struct NonceManager {
    senders: DashMap<Address, Arc<Mutex<SenderState>>>,
}

/// Exclusive right to build and submit the next transaction for a sender.
///
/// Dropping the lease releases the sender. The nonce is only recorded as used
/// through `mark_submitted`.
#[derive(Debug)]
pub struct NonceLease {
    sender: Address,
    nonce: U256,
    state: OwnedMutexGuard<SenderState>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the sender's lock, then take the node's pending transaction
    /// count, or one past our last broadcast if the node is behind it
    pub async fn acquire(
        &self,
        sender: Address,
        client: &dyn ChainClient,
    ) -> ExecutorResult<NonceLease> {
        // Clone the Arc so the map shard isn't held across the await
        let lock = self
            .senders
            .entry(sender)
            .or_insert_with(|| Arc::new(Mutex::new(SenderState::default())))
            .clone();
        let state = lock.lock_owned().await;

        let reported = client.transaction_count(sender).await.map_err(|e| {
            ExecutorError::ChainConnection(format!("nonce lookup for {:?}: {}", sender, e))
        })?;

        // A lagging node must never hand out a nonce already in flight
        let nonce = match state.last_submitted {
            Some(last) if reported <= last => {
                warn!(
                    "Node reports nonce {} for {:?} but {} was already submitted; using {}",
                    reported,
                    sender,
                    last,
                    last + 1
                );
                last + 1
            }
            _ => reported,
        };

        debug!("Allocated nonce {} for {:?}", nonce, sender);
        Ok(NonceLease {
            sender,
            nonce,
            state,
        })
    }
}

impl NonceLease {
    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    /// Record that the node accepted the transaction and release the sender
    pub fn mark_submitted(mut self, tx_hash: H256) {
        debug!(
            "Nonce {} for {:?} used by {:?}",
            self.nonce, self.sender, tx_hash
        );
        self.state.last_submitted = Some(self.nonce);
    }
}
