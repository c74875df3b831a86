//! Backend adapters: how a call reaches the chain
//!
//! Two variants share one contract:
//! - `DirectSigningBackend` signs locally with a secret key and broadcasts raw bytes
//! - `ManagedSignerBackend` hands the call to an external signer
//!
//! Which one runs is decided by `executor.provider_type`.

mod direct;
mod managed;

pub use direct::DirectSigningBackend;
pub use managed::{ManagedSigner, ManagedSignerBackend, NodeAccountSigner};
#[cfg(test)]
pub use managed::MockManagedSigner;

use crate::chain::{ChainClient, RpcClient};
use crate::config::Settings;
use crate::contract::{CallRequest, ContractArtifact, ContractTarget, EncodedCall};
use crate::error::{ExecutorError, ExecutorResult};
use crate::tx::{NonceManager, TransactionParams};

use async_trait::async_trait;
use ethers::types::H256;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Provider selection from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Development node; its unlocked accounts sign
    Local,
    /// Remote JSON-RPC endpoint; we sign with our own key
    Remote,
}

impl FromStr for ProviderKind {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ProviderKind::Local),
            "remote" => Ok(ProviderKind::Remote),
            other => Err(ExecutorError::InvalidConfiguration(format!(
                "unknown provider_type '{}', expected 'local' or 'remote'",
                other
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Local => f.write_str("local"),
            ProviderKind::Remote => f.write_str("remote"),
        }
    }
}

/// A broadcast transaction awaiting its receipt
#[derive(Debug, Clone)]
pub struct Submission {
    pub hash: H256,
    /// Known when this process built the transaction itself
    pub params: Option<TransactionParams>,
}

/// Builds, signs (or delegates signing), and submits a call.
///
/// Every method makes at most one broadcast attempt and never retries.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Endpoint used to resolve receipts for submissions from this backend
    fn client(&self) -> Arc<dyn ChainClient>;

    /// Submit already-encoded call data
    async fn submit(&self, call: EncodedCall) -> ExecutorResult<Submission>;

    /// Invoke `request.method` on `target`
    async fn build_and_submit(
        &self,
        target: &ContractTarget,
        request: &CallRequest,
    ) -> ExecutorResult<Submission> {
        let call = target.encode(request)?;
        self.submit(call).await
    }

    /// Deploy `artifact` with `request.args` as constructor arguments
    async fn deploy(
        &self,
        artifact: &ContractArtifact,
        request: &CallRequest,
    ) -> ExecutorResult<Submission> {
        let call = artifact.encode_deployment(request)?;
        self.submit(call).await
    }
}

/// Build the configured backend over `client`.
///
/// An unknown `provider_type` fails before `client` is touched.
pub async fn select_backend(
    settings: &Settings,
    client: Arc<dyn ChainClient>,
    nonces: Arc<NonceManager>,
) -> ExecutorResult<Box<dyn BackendAdapter>> {
    let kind: ProviderKind = settings.executor.provider_type.parse()?;
    info!("Using {} provider at {}", kind, settings.executor.endpoint_url);

    match kind {
        ProviderKind::Local => {
            let signer =
                NodeAccountSigner::connect(client.clone(), settings.executor.local_account_index)
                    .await?;
            Ok(Box::new(ManagedSignerBackend::new(
                client,
                Box::new(signer),
                &settings.executor,
            )))
        }
        ProviderKind::Remote => {
            let key = std::env::var(&settings.wallet.private_key_env).map_err(|_| {
                ExecutorError::InvalidConfiguration(format!(
                    "environment variable {} is not set",
                    settings.wallet.private_key_env
                ))
            })?;
            let backend =
                DirectSigningBackend::new(client, &key, nonces, &settings.executor).await?;
            Ok(Box::new(backend))
        }
    }
}

/// Validate the provider selection, open the endpoint, and build the backend
pub async fn connect(
    settings: &Settings,
    nonces: Arc<NonceManager>,
) -> ExecutorResult<Box<dyn BackendAdapter>> {
    settings.executor.provider_type.parse::<ProviderKind>()?;

    let client = RpcClient::new(
        &settings.executor.endpoint_url,
        &settings.executor.fallback_urls,
        settings.executor.poll_interval(),
    )?;

    select_backend(settings, Arc::new(client), nonces).await
}
