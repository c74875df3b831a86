//! Transaction executor: one request in, one classified outcome out

use crate::backend::{BackendAdapter, Submission};
use crate::chain::{ReceiptWaiter, WaiterConfig};
use crate::config::ExecutorConfig;
use crate::contract::{CallRequest, ContractArtifact, ContractTarget};
use crate::error::{ExecutorError, ExecutorResult};
use crate::outcome::TransactionOutcome;

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Drives a request through submission and receipt resolution.
///
/// Never retries. Every fault becomes a `TransactionOutcome`.
#[derive(Debug, Clone)]
pub struct TransactionExecutor {
    waiter: WaiterConfig,
    timeout: Duration,
}

impl TransactionExecutor {
    pub fn new(waiter: WaiterConfig, timeout: Duration) -> Self {
        Self { waiter, timeout }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(WaiterConfig::from_config(config), config.timeout())
    }

    /// Invoke `request.method` on `target` and wait for the result
    pub async fn execute(
        &self,
        target: &ContractTarget,
        request: &CallRequest,
        backend: &dyn BackendAdapter,
        cancel: &watch::Receiver<bool>,
    ) -> TransactionOutcome {
        let span = info_span!(
            "execute",
            request_id = %Uuid::new_v4(),
            backend = backend.name(),
            target = ?target.address(),
            method = %request.method,
        );

        self.run(backend, cancel, backend.build_and_submit(target, request))
            .instrument(span)
            .await
    }

    /// Deploy `artifact` and wait for the creation receipt
    pub async fn deploy(
        &self,
        artifact: &ContractArtifact,
        request: &CallRequest,
        backend: &dyn BackendAdapter,
        cancel: &watch::Receiver<bool>,
    ) -> TransactionOutcome {
        let span = info_span!(
            "deploy",
            request_id = %Uuid::new_v4(),
            backend = backend.name(),
        );

        self.run(backend, cancel, backend.deploy(artifact, request))
            .instrument(span)
            .await
    }

    async fn run<F>(
        &self,
        backend: &dyn BackendAdapter,
        cancel: &watch::Receiver<bool>,
        submit: F,
    ) -> TransactionOutcome
    where
        F: Future<Output = ExecutorResult<Submission>>,
    {
        let started = Instant::now();

        let outcome = if *cancel.borrow() {
            ExecutorError::Cancelled {
                operation: "submission".to_string(),
                hash: None,
            }
            .into()
        } else {
            match submit.await {
                Ok(submission) => {
                    let waiter = ReceiptWaiter::new(backend.client(), self.waiter.clone());
                    waiter
                        .await_finality(submission.hash, self.timeout, cancel)
                        .await
                }
                Err(e) => TransactionOutcome::from(e),
            }
        };

        let elapsed = started.elapsed();
        crate::metrics::record_outcome(backend.name(), &outcome, elapsed.as_secs_f64());
        log_outcome(&outcome, elapsed);
        outcome
    }
}

fn log_outcome(outcome: &TransactionOutcome, elapsed: Duration) {
    let hash = outcome.hash().map(|h| format!("{:?}", h));
    match outcome {
        TransactionOutcome::Success { receipt, .. } => info!(
            outcome = outcome.label(),
            hash = hash.as_deref(),
            block = receipt.block_number,
            elapsed_ms = elapsed.as_millis() as u64,
            "Transaction succeeded"
        ),
        TransactionOutcome::Reverted { reason, .. } => warn!(
            outcome = outcome.label(),
            hash = hash.as_deref(),
            reason = reason.as_deref(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Transaction reverted"
        ),
        TransactionOutcome::Failed { message, .. } => error!(
            outcome = outcome.label(),
            hash = hash.as_deref(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Transaction failed: {}",
            message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ManagedSignerBackend, MockManagedSigner, DirectSigningBackend};
    use crate::chain::{ChainClient, ClientError, MockChainClient};
    use crate::config::Settings;
    use crate::outcome::{FailureKind, TxState};
    use crate::tx::NonceManager;
    use ethers::types::{Address, Transaction, TransactionReceipt, H256, U256, U64};
    use ethers::utils::rlp;
    use std::sync::Arc;

    const KEY: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";

    const TOKEN_ABI: &str = r#"[
        {"type":"function","name":"transfer","stateMutability":"nonpayable",
         "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
         "outputs":[{"name":"","type":"bool"}]}
    ]"#;

    const ARTIFACT: &str = r#"{
        "abi":[{"type":"constructor","stateMutability":"nonpayable",
                "inputs":[{"name":"supply","type":"uint256"}]}],
        "bytecode":"0x6080604052"
    }"#;

    fn feed() -> H256 {
        H256::from_low_u64_be(0xFEED)
    }

    fn settings(provider_type: &str) -> Settings {
        Settings::from_toml(&format!(
            r#"
            [executor]
            provider_type = "{}"
            endpoint_url = "http://127.0.0.1:8545"
            chain_id = 31337
            timeout_ms = 60000
            gas_limit = 60000
            gas_price_wei = 1000000000
            poll_initial_ms = 1000
            poll_max_ms = 4000
            "#,
            provider_type
        ))
        .unwrap()
    }

    fn target() -> ContractTarget {
        ContractTarget::from_json(&format!("{:?}", Address::from_low_u64_be(0xBEEF)), TOKEN_ABI)
            .unwrap()
    }

    /// Ten tokens at 18 decimals to 0x...cafe
    fn transfer() -> CallRequest {
        CallRequest::new(
            "transfer",
            vec![
                format!("{:?}", Address::from_low_u64_be(0xCAFE)),
                "10000000000000000000".to_string(),
            ],
        )
    }

    fn receipt(status: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: feed(),
            block_number: Some(U64::from(7)),
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    fn funded_client() -> MockChainClient {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::from(5)));
        client
            .expect_balance()
            .returning(|_| Ok(U256::exp10(18)));
        client
    }

    async fn direct(client: MockChainClient) -> DirectSigningBackend {
        let client: Arc<dyn ChainClient> = Arc::new(client);
        DirectSigningBackend::new(
            client,
            KEY,
            Arc::new(NonceManager::new()),
            &settings("remote").executor,
        )
        .await
        .unwrap()
    }

    fn executor() -> TransactionExecutor {
        TransactionExecutor::from_config(&settings("remote").executor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_call_succeeds() {
        let mut client = funded_client();
        client
            .expect_send_raw_transaction()
            .times(1)
            .withf(|raw| {
                let tx: Transaction = rlp::decode(raw).unwrap();
                tx.nonce == U256::from(5)
                    && tx.to == Some(Address::from_low_u64_be(0xBEEF))
                    && tx.input[..4] == [0xa9, 0x05, 0x9c, 0xbb]
                    && U256::from_big_endian(&tx.input[36..68]) == U256::exp10(19)
            })
            .returning(|_| Ok(feed()));
        let mut polls = 0;
        client.expect_transaction_receipt().returning(move |hash| {
            assert_eq!(hash, feed());
            polls += 1;
            Ok(if polls < 2 { None } else { Some(receipt(1)) })
        });

        let backend = direct(client).await;
        let (_tx, cancel) = watch::channel(false);
        let outcome = executor()
            .execute(&target(), &transfer(), &backend, &cancel)
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.hash(), Some(feed()));
        assert_eq!(outcome.state(), TxState::MinedSuccess);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_managed_call_reverts_with_reason() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(Some(receipt(0))));
        client
            .expect_revert_reason()
            .returning(|_| Ok(Some("insufficient balance".to_string())));

        let mut signer = MockManagedSigner::new();
        signer
            .expect_address()
            .return_const(Address::from_low_u64_be(0xA11CE));
        signer
            .expect_send_transaction()
            .times(1)
            .returning(|_| Ok(feed()));

        let backend = ManagedSignerBackend::new(
            Arc::new(client),
            Box::new(signer),
            &settings("local").executor,
        );
        let (_tx, cancel) = watch::channel(false);
        let outcome = executor()
            .execute(&target(), &transfer(), &backend, &cancel)
            .await;

        assert_eq!(
            outcome,
            TransactionOutcome::Reverted {
                hash: feed(),
                reason: Some("insufficient balance".to_string()),
            }
        );
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_method_never_submits() {
        let mut client = MockChainClient::new();
        client.expect_send_raw_transaction().never();
        client.expect_transaction_count().never();

        let backend = direct(client).await;
        let (_tx, cancel) = watch::channel(false);
        let outcome = executor()
            .execute(
                &target(),
                &CallRequest::new("mint", vec![]),
                &backend,
                &cancel,
            )
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::InvalidConfiguration));
        assert_eq!(outcome.hash(), None);
        assert_eq!(outcome.exit_code(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_underfunded_sender() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::zero()));
        client.expect_balance().returning(|_| Ok(U256::zero()));
        client.expect_send_raw_transaction().never();
        client.expect_transaction_receipt().never();

        let backend = direct(client).await;
        let (_tx, cancel) = watch::channel(false);
        let outcome = executor()
            .execute(&target(), &transfer(), &backend, &cancel)
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::InsufficientFunds));
        assert_eq!(outcome.state(), TxState::SubmissionFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_is_not_polled() {
        let mut client = funded_client();
        client
            .expect_send_raw_transaction()
            .times(1)
            .returning(|_| {
                Err(ClientError::Rpc {
                    code: -32000,
                    message: "nonce too low".to_string(),
                    data: None,
                })
            });
        client.expect_transaction_receipt().never();

        let backend = direct(client).await;
        let (_tx, cancel) = watch::channel(false);
        let outcome = executor()
            .execute(&target(), &transfer(), &backend, &cancel)
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::SubmissionRejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_mined_times_out_with_hash() {
        let mut client = funded_client();
        client
            .expect_send_raw_transaction()
            .returning(|_| Ok(feed()));
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(None));

        let backend = direct(client).await;
        let (_tx, cancel) = watch::channel(false);
        let started = Instant::now();
        let outcome = TransactionExecutor::new(
            WaiterConfig {
                initial_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(4),
                confirmations: 1,
            },
            Duration::from_secs(10),
        )
        .execute(&target(), &transfer(), &backend, &cancel)
        .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(outcome.hash(), Some(feed()));
        assert_eq!(outcome.state(), TxState::TimedOut);
        assert!(started.elapsed() <= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_submission() {
        let mut client = MockChainClient::new();
        client.expect_transaction_count().never();
        client.expect_send_raw_transaction().never();

        let backend = direct(client).await;
        let (_tx, cancel) = watch::channel(true);
        let outcome = executor()
            .execute(&target(), &transfer(), &backend, &cancel)
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(outcome.hash(), None);
        assert_eq!(outcome.state(), TxState::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_reports_contract_address() {
        let mut client = funded_client();
        client
            .expect_send_raw_transaction()
            .times(1)
            .returning(|_| Ok(feed()));
        client.expect_transaction_receipt().returning(|_| {
            Ok(Some(TransactionReceipt {
                contract_address: Some(Address::from_low_u64_be(0xC0DE)),
                ..receipt(1)
            }))
        });

        let backend = direct(client).await;
        let artifact = ContractArtifact::from_json(ARTIFACT).unwrap();
        let (_tx, cancel) = watch::channel(false);
        let outcome = executor()
            .deploy(
                &artifact,
                &CallRequest::constructor(vec!["1000".to_string()]),
                &backend,
                &cancel,
            )
            .await;

        match outcome {
            TransactionOutcome::Success { hash, receipt } => {
                assert_eq!(hash, feed());
                assert_eq!(receipt.contract_address, Some(Address::from_low_u64_be(0xC0DE)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
