//! Chain module - the JSON-RPC surface the executor talks to
//!
//! This module provides:
//! - The `ChainClient` abstraction over an endpoint
//! - An HTTP implementation with fallback endpoints for reads
//! - Receipt polling and outcome classification

pub mod finality;
pub mod provider;

pub use finality::{ReceiptWaiter, WaiterConfig};
pub use provider::RpcClient;

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::providers::{ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use thiserror::Error;

/// Selector of the standard `Error(string)` revert payload
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Failure talking to an endpoint
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The node answered with a JSON-RPC error
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Bytes>,
    },

    /// No usable answer: connection, timeout or decoding failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Best-effort revert reason carried by an `eth_call`/`eth_estimateGas` error
    pub fn revert_reason(&self) -> Option<String> {
        match self {
            ClientError::Rpc { message, data, .. } => data
                .as_ref()
                .and_then(|data| decode_revert_reason(data))
                .or_else(|| {
                    message
                        .strip_prefix("execution reverted: ")
                        .map(|reason| reason.to_string())
                }),
            ClientError::Transport(_) => None,
        }
    }
}

impl From<ProviderError> for ClientError {
    fn from(err: ProviderError) -> Self {
        match err.as_error_response() {
            Some(response) => ClientError::Rpc {
                code: response.code,
                message: response.message.clone(),
                data: response.data.as_ref().and_then(revert_data_from_json),
            },
            None => ClientError::Transport(err.to_string()),
        }
    }
}

/// Nodes put revert data either directly in `data` or nested one level down
fn revert_data_from_json(value: &serde_json::Value) -> Option<Bytes> {
    match value {
        serde_json::Value::String(s) => hex::decode(s.trim_start_matches("0x")).ok().map(Bytes::from),
        serde_json::Value::Object(map) => map.get("data").and_then(revert_data_from_json),
        _ => None,
    }
}

/// Decode an `Error(string)` payload
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    match abi::decode(&[ParamType::String], &data[4..]).ok()?.pop()? {
        Token::String(reason) => Some(reason),
        _ => None,
    }
}

/// JSON-RPC endpoint operations used by the backends and the receipt waiter.
///
/// Implementations must be cheap to share: backends hold one behind an `Arc`
/// and hand it to the `ReceiptWaiter`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_chainId`
    async fn chain_id(&self) -> Result<u64, ClientError>;

    /// `eth_blockNumber`
    async fn block_number(&self) -> Result<u64, ClientError>;

    /// `eth_getTransactionCount` at the pending tag
    async fn transaction_count(&self, address: Address) -> Result<U256, ClientError>;

    /// `eth_getBalance` at the latest block
    async fn balance(&self, address: Address) -> Result<U256, ClientError>;

    /// `eth_gasPrice`
    async fn gas_price(&self) -> Result<U256, ClientError>;

    /// EIP-1559 fee suggestion: `(max_fee_per_gas, max_priority_fee_per_gas)`
    async fn eip1559_fees(&self) -> Result<(U256, U256), ClientError>;

    /// `eth_estimateGas`
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ClientError>;

    /// `eth_accounts`
    async fn accounts(&self) -> Result<Vec<Address>, ClientError>;

    /// `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ClientError>;

    /// `eth_sendTransaction`, signed by an account the node manages
    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, ClientError>;

    /// `eth_getTransactionReceipt`
    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ClientError>;

    /// Replay a mined transaction at its block and extract the revert reason
    async fn revert_reason(&self, receipt: &TransactionReceipt) -> Result<Option<String>, ClientError>;
}
