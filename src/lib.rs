//! Transaction submission and confirmation for EVM contracts
//!
//! Builds a contract call (or deployment), signs it locally or through a
//! managed signer, submits it exactly once, then polls for the receipt until
//! it resolves, times out, or is cancelled. Every request ends in a single
//! classified `TransactionOutcome`.

pub mod backend;
pub mod chain;
pub mod config;
pub mod contract;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod outcome;
pub mod tx;

pub use backend::{BackendAdapter, DirectSigningBackend, ManagedSignerBackend, ProviderKind};
pub use chain::{ChainClient, ReceiptWaiter, RpcClient, WaiterConfig};
pub use config::Settings;
pub use contract::{CallRequest, ContractArtifact, ContractTarget};
pub use error::{ExecutorError, ExecutorResult};
pub use executor::TransactionExecutor;
pub use outcome::{FailureKind, TransactionOutcome, TxState};
