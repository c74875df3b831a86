//! HTTP chain client with fallback endpoints

use super::{ChainClient, ClientError};
use crate::error::{ExecutorError, ExecutorResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Run a read against the active provider, failing over to the next one on
/// transport errors. JSON-RPC error responses are returned as-is: another
/// node would give the same answer.
macro_rules! with_failover {
    ($self:ident, $op:expr, |$provider:ident| $call:expr) => {{
        let mut last_error = None;
        for _ in 0..$self.providers.len() {
            let $provider = $self.http();
            match $call.await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let err = ClientError::from(e);
                    if let ClientError::Rpc { .. } = err {
                        return Err(err);
                    }
                    warn!("{} failed on {}: {}", $op, $self.active_url(), err);
                    last_error = Some(err);
                    $self.failover();
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ClientError::Transport("no providers configured".to_string())))
    }};
}

/// JSON-RPC client over one primary and any number of fallback endpoints.
///
/// Only reads fail over. Sends always go to the active provider exactly once.
pub struct RpcClient {
    urls: Vec<String>,
    providers: Vec<Provider<Http>>,
    current: AtomicUsize,
}

impl RpcClient {
    /// Create a client; no network traffic happens until the first request
    pub fn new(
        endpoint_url: &str,
        fallback_urls: &[String],
        poll_interval: Duration,
    ) -> ExecutorResult<Self> {
        let mut urls = Vec::new();
        let mut providers = Vec::new();

        for url in std::iter::once(endpoint_url).chain(fallback_urls.iter().map(String::as_str)) {
            let provider = Provider::<Http>::try_from(url).map_err(|e| {
                ExecutorError::InvalidConfiguration(format!("Invalid endpoint URL {}: {}", url, e))
            })?;
            providers.push(provider.interval(poll_interval));
            urls.push(url.to_string());
            debug!("Added HTTP provider: {}", url);
        }

        Ok(Self {
            urls,
            providers,
            current: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    fn active_url(&self) -> &str {
        let idx = self.current.load(Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        if self.providers.len() < 2 {
            return;
        }
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Failing over to provider {}", self.urls[next]);
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        with_failover!(self, "eth_chainId", |p| async {
            p.get_chainid().await.map(|id| id.as_u64())
        })
    }

    async fn block_number(&self) -> Result<u64, ClientError> {
        with_failover!(self, "eth_blockNumber", |p| async {
            p.get_block_number().await.map(|n| n.as_u64())
        })
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, ClientError> {
        with_failover!(self, "eth_getTransactionCount", |p| p
            .get_transaction_count(address, Some(BlockNumber::Pending.into())))
    }

    async fn balance(&self, address: Address) -> Result<U256, ClientError> {
        with_failover!(self, "eth_getBalance", |p| p.get_balance(address, None))
    }

    async fn gas_price(&self) -> Result<U256, ClientError> {
        with_failover!(self, "eth_gasPrice", |p| p.get_gas_price())
    }

    async fn eip1559_fees(&self) -> Result<(U256, U256), ClientError> {
        with_failover!(self, "eth_feeHistory", |p| p.estimate_eip1559_fees(None))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ClientError> {
        with_failover!(self, "eth_estimateGas", |p| p.estimate_gas(tx, None))
    }

    async fn accounts(&self) -> Result<Vec<Address>, ClientError> {
        with_failover!(self, "eth_accounts", |p| p.get_accounts())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ClientError> {
        let pending = self.http().send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, ClientError> {
        let pending = self.http().send_transaction(tx, None).await?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ClientError> {
        with_failover!(self, "eth_getTransactionReceipt", |p| p
            .get_transaction_receipt(hash))
    }

    async fn revert_reason(&self, receipt: &TransactionReceipt) -> Result<Option<String>, ClientError> {
        let tx = match self.http().get_transaction(receipt.transaction_hash).await? {
            Some(tx) => tx,
            None => return Ok(None),
        };

        let mut call: TypedTransaction = TransactionRequest::new()
            .from(tx.from)
            .data(tx.input.clone())
            .value(tx.value)
            .gas(tx.gas)
            .into();
        if let Some(to) = tx.to {
            call.set_to(to);
        }

        let block = receipt
            .block_number
            .map(|n| BlockId::Number(BlockNumber::Number(n)));

        match self.http().call(&call, block).await {
            // Replay succeeded: the revert depended on state we can't reproduce
            Ok(_) => Ok(None),
            Err(e) => Ok(ClientError::from(e).revert_reason()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_url() {
        let result = RpcClient::new("not a url", &[], Duration::from_millis(100));
        assert!(matches!(result, Err(ExecutorError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_failover_cycles_through_fallbacks() {
        let client = RpcClient::new(
            "http://127.0.0.1:8545",
            &["http://127.0.0.1:9545".to_string()],
            Duration::from_millis(100),
        )
        .unwrap();

        assert_eq!(client.active_url(), "http://127.0.0.1:8545");
        client.failover();
        assert_eq!(client.active_url(), "http://127.0.0.1:9545");
        client.failover();
        assert_eq!(client.active_url(), "http://127.0.0.1:8545");
    }
}
