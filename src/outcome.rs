//! Terminal results of a single executed request

use crate::error::ExecutorError;

use ethers::types::{Address, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification carried by a failed outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidConfiguration,
    InsufficientFunds,
    SubmissionRejected,
    Ambiguous,
    Timeout,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidConfiguration => "invalid_configuration",
            FailureKind::InsufficientFunds => "insufficient_funds",
            FailureKind::SubmissionRejected => "submission_rejected",
            FailureKind::Ambiguous => "ambiguous",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one request.
///
/// `Built -> Signed -> Submitted -> {MinedSuccess | MinedReverted | TimedOut}`,
/// with `SubmissionFailed` reachable from any pre-broadcast state and
/// `Abandoned` when the caller cancels the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Built,
    Signed,
    Submitted,
    MinedSuccess,
    MinedReverted,
    TimedOut,
    SubmissionFailed,
    Abandoned,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxState::Built | TxState::Signed | TxState::Submitted)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::Built => "built",
            TxState::Signed => "signed",
            TxState::Submitted => "submitted",
            TxState::MinedSuccess => "mined_success",
            TxState::MinedReverted => "mined_reverted",
            TxState::TimedOut => "timed_out",
            TxState::SubmissionFailed => "submission_failed",
            TxState::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// The parts of a receipt worth reporting
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
    pub effective_gas_price: Option<U256>,
    /// Set for contract deployments
    pub contract_address: Option<Address>,
}

impl From<&TransactionReceipt> for ReceiptSummary {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            block_number: receipt.block_number.map(|n| n.as_u64()),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            contract_address: receipt.contract_address,
        }
    }
}

/// Result of executing one request. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionOutcome {
    Success {
        hash: H256,
        receipt: ReceiptSummary,
    },
    Reverted {
        hash: H256,
        reason: Option<String>,
    },
    Failed {
        kind: FailureKind,
        message: String,
        /// Present when a transaction was signed or broadcast before the failure
        hash: Option<H256>,
    },
}

impl TransactionOutcome {
    pub fn hash(&self) -> Option<H256> {
        match self {
            TransactionOutcome::Success { hash, .. } | TransactionOutcome::Reverted { hash, .. } => {
                Some(*hash)
            }
            TransactionOutcome::Failed { hash, .. } => *hash,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransactionOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TransactionOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Terminal lifecycle state this outcome corresponds to
    pub fn state(&self) -> TxState {
        match self {
            TransactionOutcome::Success { .. } => TxState::MinedSuccess,
            TransactionOutcome::Reverted { .. } => TxState::MinedReverted,
            TransactionOutcome::Failed { kind, .. } => match kind {
                FailureKind::Timeout => TxState::TimedOut,
                FailureKind::Cancelled => TxState::Abandoned,
                _ => TxState::SubmissionFailed,
            },
        }
    }

    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            TransactionOutcome::Success { .. } => "success",
            TransactionOutcome::Reverted { .. } => "reverted",
            TransactionOutcome::Failed { kind, .. } => kind.as_str(),
        }
    }

    /// Process exit status for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            TransactionOutcome::Success { .. } => 0,
            TransactionOutcome::Failed {
                kind: FailureKind::InvalidConfiguration,
                ..
            } => 2,
            _ => 1,
        }
    }
}

impl From<ExecutorError> for TransactionOutcome {
    fn from(err: ExecutorError) -> Self {
        TransactionOutcome::Failed {
            kind: err.kind(),
            hash: err.hash(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOutcome::Success { hash, receipt } => match receipt.contract_address {
                Some(address) => write!(f, "transaction {:?} succeeded, contract deployed to {:?}", hash, address),
                None => write!(f, "transaction {:?} succeeded", hash),
            },
            TransactionOutcome::Reverted { hash, reason } => match reason {
                Some(reason) => write!(f, "transaction {:?} reverted: {}", hash, reason),
                None => write!(f, "transaction {:?} reverted", hash),
            },
            TransactionOutcome::Failed { kind, message, hash } => match hash {
                Some(hash) => write!(f, "{} (transaction {:?}): {}", kind, hash, message),
                None => write!(f, "{}: {}", kind, message),
            },
        }
    }
}
