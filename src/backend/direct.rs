//! Direct-signing backend: local key, raw transaction broadcast

use super::{BackendAdapter, Submission};
use crate::chain::ChainClient;
use crate::config::ExecutorConfig;
use crate::contract::EncodedCall;
use crate::error::{ExecutorError, ExecutorResult};
use crate::outcome::TxState;
use crate::tx::{GasEstimator, NonceLease, NonceManager, TransactionParams};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Signs with a local key and broadcasts via `eth_sendRawTransaction`.
///
/// The key never leaves this struct: `LocalWallet`'s `Debug` output only
/// shows the address.
pub struct DirectSigningBackend {
    client: Arc<dyn ChainClient>,
    wallet: LocalWallet,
    nonces: Arc<NonceManager>,
    gas: GasEstimator,
    chain_id: u64,
    submit_timeout: Duration,
}

impl DirectSigningBackend {
    /// Create a backend from a hex private key.
    ///
    /// The chain id is taken from configuration, or asked from the node.
    pub async fn new(
        client: Arc<dyn ChainClient>,
        private_key: &str,
        nonces: Arc<NonceManager>,
        config: &ExecutorConfig,
    ) -> ExecutorResult<Self> {
        // Parse errors are replaced wholesale so no key material can leak
        let wallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|_| ExecutorError::Wallet("private key is not valid secp256k1 hex".to_string()))?;

        let chain_id = match config.chain_id {
            Some(id) => id,
            None => client
                .chain_id()
                .await
                .map_err(|e| ExecutorError::ChainConnection(format!("chain id: {}", e)))?,
        };

        let wallet = wallet.with_chain_id(chain_id);
        info!(
            "Direct-signing backend initialized with wallet {:?} on chain {}",
            wallet.address(),
            chain_id
        );

        Ok(Self {
            client,
            wallet,
            nonces,
            gas: GasEstimator::new(config.gas_price_strategy, config.gas_limit, config.gas_price_wei),
            chain_id,
            submit_timeout: config.submit_timeout(),
        })
    }

    /// Address derived from the key
    pub fn sender(&self) -> Address {
        self.wallet.address()
    }

    /// Assemble parameters for `call` at the leased nonce
    async fn build(&self, call: &EncodedCall, lease: &NonceLease) -> ExecutorResult<TransactionParams> {
        // Estimation needs the call itself, before gas fields exist
        let mut estimate_tx: TypedTransaction = TransactionRequest::new()
            .from(self.sender())
            .data(call.data.clone())
            .into();
        if let Some(to) = call.to {
            estimate_tx.set_to(to);
        }
        if let Some(value) = call.value {
            estimate_tx.set_value(value);
        }

        let gas_limit = self
            .gas
            .resolve_gas_limit(self.client.as_ref(), &estimate_tx, call.gas_limit)
            .await?;
        let gas_price = self
            .gas
            .resolve_gas_price(self.client.as_ref(), call.gas_price)
            .await?;

        Ok(TransactionParams {
            chain_id: self.chain_id,
            from: self.sender(),
            to: call.to,
            data: call.data.clone(),
            nonce: lease.nonce(),
            gas_limit,
            gas_price,
            value: call.value,
        })
    }

    /// Refuse to broadcast what the sender cannot pay for
    async fn check_balance(&self, params: &TransactionParams) -> ExecutorResult<()> {
        let balance = self
            .client
            .balance(params.from)
            .await
            .map_err(|e| ExecutorError::ChainConnection(format!("balance: {}", e)))?;
        let need = params.max_cost();

        if balance < need {
            return Err(ExecutorError::InsufficientFunds(format!(
                "{:?} has {} wei, needs {} wei",
                params.from, balance, need
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for DirectSigningBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn client(&self) -> Arc<dyn ChainClient> {
        self.client.clone()
    }

    async fn submit(&self, call: EncodedCall) -> ExecutorResult<Submission> {
        let lease = self.nonces.acquire(self.sender(), self.client.as_ref()).await?;

        let params = self.build(&call, &lease).await?;
        debug!("{}: nonce {} gas {} {:?}", TxState::Built, params.nonce, params.gas_limit, params.gas_price);

        self.check_balance(&params).await?;

        let tx = params.to_typed();
        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ExecutorError::Wallet(format!("signing failed: {}", e)))?;
        let local_hash = tx.hash(&signature);
        let raw = tx.rlp_signed(&signature);
        debug!("{}: {:?}", TxState::Signed, local_hash);

        // Exactly one attempt. After a timeout the node may or may not have it.
        match timeout(self.submit_timeout, self.client.send_raw_transaction(raw)).await {
            Ok(Ok(hash)) => {
                if hash != local_hash {
                    warn!("Node returned hash {:?}, computed {:?}", hash, local_hash);
                }
                info!("{}: {:?} (nonce {})", TxState::Submitted, hash, params.nonce);
                lease.mark_submitted(hash);
                crate::metrics::record_tx_submitted(self.name());
                Ok(Submission {
                    hash,
                    params: Some(params),
                })
            }
            Ok(Err(e)) => {
                warn!("Transaction {:?} not accepted: {}", local_hash, e);
                Err(ExecutorError::from_submission(e, Some(local_hash)))
            }
            Err(_) => {
                warn!(
                    "Submission of {:?} timed out after {:?}",
                    local_hash, self.submit_timeout
                );
                Err(ExecutorError::Ambiguous {
                    message: format!("no response within {:?}", self.submit_timeout),
                    hash: Some(local_hash),
                })
            }
        }
    }
}
