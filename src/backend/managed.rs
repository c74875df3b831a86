//! Managed-signer backend: an external signer owns the key

use super::{BackendAdapter, Submission};
use crate::chain::{ChainClient, ClientError};
use crate::config::ExecutorConfig;
use crate::contract::EncodedCall;
use crate::error::{ExecutorError, ExecutorResult};
use crate::outcome::TxState;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Something that signs and broadcasts on our behalf
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManagedSigner: Send + Sync {
    /// Account the signer sends from
    fn address(&self) -> Address;

    /// Sign and broadcast; the signer fills in nonce and anything left unset
    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, ClientError>;
}

/// An unlocked account on a development node, driven via `eth_sendTransaction`
pub struct NodeAccountSigner {
    client: Arc<dyn ChainClient>,
    address: Address,
}

impl NodeAccountSigner {
    /// Use the node's `index`-th account
    pub async fn connect(client: Arc<dyn ChainClient>, index: usize) -> ExecutorResult<Self> {
        let accounts = client
            .accounts()
            .await
            .map_err(|e| ExecutorError::ChainConnection(format!("eth_accounts: {}", e)))?;

        let address = accounts.get(index).copied().ok_or_else(|| {
            ExecutorError::InvalidConfiguration(format!(
                "local_account_index {} out of range, node exposes {} account(s)",
                index,
                accounts.len()
            ))
        })?;

        info!("Using node account {:?} (index {})", address, index);
        Ok(Self { client, address })
    }
}

#[async_trait]
impl ManagedSigner for NodeAccountSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, ClientError> {
        self.client.send_transaction(tx).await
    }
}

/// Delegates signing and nonce selection to a `ManagedSigner`
pub struct ManagedSignerBackend {
    client: Arc<dyn ChainClient>,
    signer: Box<dyn ManagedSigner>,
    gas_limit: Option<u64>,
    gas_price: Option<u64>,
    submit_timeout: Duration,
}

impl ManagedSignerBackend {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Box<dyn ManagedSigner>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            client,
            signer,
            gas_limit: config.gas_limit,
            gas_price: config.gas_price_wei,
            submit_timeout: config.submit_timeout(),
        }
    }

    /// Request handed to the signer. Unset gas fields are left to it.
    fn build(&self, call: &EncodedCall) -> TransactionRequest {
        let mut tx = TransactionRequest::new()
            .from(self.signer.address())
            .data(call.data.clone());
        if let Some(to) = call.to {
            tx = tx.to(to);
        }
        if let Some(value) = call.value {
            tx = tx.value(value);
        }
        if let Some(gas) = call.gas_limit.or(self.gas_limit.map(U256::from)) {
            tx = tx.gas(gas);
        }
        if let Some(price) = call.gas_price.or(self.gas_price.map(U256::from)) {
            tx = tx.gas_price(price);
        }
        tx
    }
}

#[async_trait]
impl BackendAdapter for ManagedSignerBackend {
    fn name(&self) -> &'static str {
        "managed"
    }

    fn client(&self) -> Arc<dyn ChainClient> {
        self.client.clone()
    }

    async fn submit(&self, call: EncodedCall) -> ExecutorResult<Submission> {
        let tx = self.build(&call);
        debug!("{}: from {:?} to {:?}", TxState::Built, tx.from, tx.to);

        // The hash is only known once the signer answers
        match timeout(self.submit_timeout, self.signer.send_transaction(tx.into())).await {
            Ok(Ok(hash)) => {
                info!("{}: {:?} via managed signer", TxState::Submitted, hash);
                crate::metrics::record_tx_submitted(self.name());
                Ok(Submission { hash, params: None })
            }
            Ok(Err(e)) => {
                warn!("Managed signer refused transaction: {}", e);
                Err(ExecutorError::from_submission(e, None))
            }
            Err(_) => Err(ExecutorError::Ambiguous {
                message: format!("managed signer did not answer within {:?}", self.submit_timeout),
                hash: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::config::Settings;
    use crate::outcome::FailureKind;
    use ethers::types::Bytes;

    fn config() -> ExecutorConfig {
        Settings::from_toml(
            r#"
            [executor]
            provider_type = "local"
            endpoint_url = "http://127.0.0.1:8545"
            gas_limit = 60000
            submit_timeout_ms = 1000
            "#,
        )
        .unwrap()
        .executor
    }

    fn call() -> EncodedCall {
        EncodedCall {
            to: Some(Address::from_low_u64_be(0xBEEF)),
            data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
            value: None,
            gas_limit: None,
            gas_price: None,
        }
    }

    fn signer() -> MockManagedSigner {
        let mut signer = MockManagedSigner::new();
        signer
            .expect_address()
            .return_const(Address::from_low_u64_be(0xA11CE));
        signer
    }

    #[tokio::test]
    async fn test_submits_without_nonce() {
        let mut signer = signer();
        signer
            .expect_send_transaction()
            .times(1)
            .withf(|tx| {
                tx.nonce().is_none()
                    && tx.from() == Some(&Address::from_low_u64_be(0xA11CE))
                    && tx.gas() == Some(&U256::from(60_000))
                    && tx.gas_price().is_none()
            })
            .returning(|_| Ok(H256::from_low_u64_be(0xFEED)));

        let backend =
            ManagedSignerBackend::new(Arc::new(MockChainClient::new()), Box::new(signer), &config());
        let submission = backend.submit(call()).await.unwrap();

        assert_eq!(submission.hash, H256::from_low_u64_be(0xFEED));
        assert!(submission.params.is_none());
    }

    #[tokio::test]
    async fn test_request_gas_overrides_config() {
        let mut signer = signer();
        signer
            .expect_send_transaction()
            .withf(|tx| tx.gas() == Some(&U256::from(21_000)) && tx.gas_price() == Some(U256::from(9)))
            .returning(|_| Ok(H256::from_low_u64_be(1)));

        let backend =
            ManagedSignerBackend::new(Arc::new(MockChainClient::new()), Box::new(signer), &config());
        let call = EncodedCall {
            gas_limit: Some(U256::from(21_000)),
            gas_price: Some(U256::from(9)),
            ..call()
        };

        assert!(backend.submit(call).await.is_ok());
    }

    #[tokio::test]
    async fn test_signer_error_classification() {
        let mut signer = signer();
        signer.expect_send_transaction().times(1).returning(|_| {
            Err(ClientError::Rpc {
                code: -32000,
                message: "insufficient funds for gas * price + value".to_string(),
                data: None,
            })
        });

        let backend =
            ManagedSignerBackend::new(Arc::new(MockChainClient::new()), Box::new(signer), &config());
        let err = backend.submit(call()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::InsufficientFunds);
    }

    #[tokio::test]
    async fn test_transport_error_is_ambiguous() {
        let mut signer = signer();
        signer
            .expect_send_transaction()
            .returning(|_| Err(ClientError::Transport("broken pipe".to_string())));

        let backend =
            ManagedSignerBackend::new(Arc::new(MockChainClient::new()), Box::new(signer), &config());
        let err = backend.submit(call()).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::Ambiguous);
        assert_eq!(err.hash(), None);
    }

    #[tokio::test]
    async fn test_node_account_index() {
        let mut client = MockChainClient::new();
        client.expect_accounts().returning(|| {
            Ok(vec![
                Address::from_low_u64_be(1),
                Address::from_low_u64_be(2),
            ])
        });
        let client: Arc<dyn ChainClient> = Arc::new(client);

        let signer = NodeAccountSigner::connect(client.clone(), 1).await.unwrap();
        assert_eq!(signer.address(), Address::from_low_u64_be(2));

        let err = NodeAccountSigner::connect(client, 2).await.err().unwrap();
        assert!(matches!(err, ExecutorError::InvalidConfiguration(_)));
    }
}
