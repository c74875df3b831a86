//! Error types for the transaction executor

use crate::chain::ClientError;
use crate::outcome::FailureKind;

use ethers::types::H256;
use thiserror::Error;

/// Main error type for the executor
#[derive(Error, Debug, Clone)]
pub enum ExecutorError {
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    #[error("Call encoding error: {0}")]
    Encoding(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Chain connection error: {0}")]
    ChainConnection(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Submission rejected by node: {0}")]
    SubmissionRejected(String),

    #[error("Submission outcome unknown: {message}")]
    Ambiguous { message: String, hash: Option<H256> },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String, hash: Option<H256> },

    #[error("Cancelled while waiting for {operation}")]
    Cancelled { operation: String, hash: Option<H256> },
}

impl ExecutorError {
    /// Classify a failed submission attempt.
    ///
    /// A JSON-RPC error response is a definite rejection: the node refused the
    /// transaction and nothing is in its mempool. Anything else means the
    /// request may or may not have reached the node.
    pub fn from_submission(err: ClientError, hash: Option<H256>) -> Self {
        match err {
            ClientError::Rpc { message, .. } if is_insufficient_funds(&message) => {
                ExecutorError::InsufficientFunds(message)
            }
            ClientError::Rpc { code, message, .. } => {
                ExecutorError::SubmissionRejected(format!("{} (code {})", message, code))
            }
            ClientError::Transport(message) => ExecutorError::Ambiguous { message, hash },
        }
    }

    /// Classification reported in a failed outcome
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutorError::InvalidConfiguration(_)
            | ExecutorError::Encoding(_)
            | ExecutorError::Wallet(_) => FailureKind::InvalidConfiguration,
            ExecutorError::ChainConnection(_) | ExecutorError::SubmissionRejected(_) => {
                FailureKind::SubmissionRejected
            }
            ExecutorError::InsufficientFunds(_) => FailureKind::InsufficientFunds,
            ExecutorError::Ambiguous { .. } => FailureKind::Ambiguous,
            ExecutorError::Timeout { .. } => FailureKind::Timeout,
            ExecutorError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// Hash of the transaction, if one was signed or broadcast
    pub fn hash(&self) -> Option<H256> {
        match self {
            ExecutorError::Ambiguous { hash, .. }
            | ExecutorError::Timeout { hash, .. }
            | ExecutorError::Cancelled { hash, .. } => *hash,
            _ => None,
        }
    }

    /// Check if the same request can be resubmitted with the same nonce.
    ///
    /// Only true when the transaction definitely never entered a mempool.
    pub fn is_resubmittable(&self) -> bool {
        matches!(
            self,
            ExecutorError::ChainConnection(_)
                | ExecutorError::SubmissionRejected(_)
                | ExecutorError::InsufficientFunds(_)
        )
    }
}

fn is_insufficient_funds(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("insufficient funds") || message.contains("insufficient balance for transfer")
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;
