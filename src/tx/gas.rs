//! Gas limit and price resolution

use crate::chain::ChainClient;
use crate::config::GasPriceStrategy;
use crate::error::{ExecutorError, ExecutorResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use serde::Serialize;
use tracing::debug;

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Resolves gas parameters for a transaction.
///
/// Precedence for both limit and price: request override, then the
/// configured fixed value, then a buffered quote from the node.
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    strategy: GasPriceStrategy,
    configured_limit: Option<u64>,
    configured_price: Option<u64>,
}

impl GasEstimator {
    pub fn new(
        strategy: GasPriceStrategy,
        configured_limit: Option<u64>,
        configured_price: Option<u64>,
    ) -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
            strategy,
            configured_limit,
            configured_price,
        }
    }

    /// Resolve the gas limit for `tx`
    pub async fn resolve_gas_limit(
        &self,
        client: &dyn ChainClient,
        tx: &TypedTransaction,
        override_limit: Option<U256>,
    ) -> ExecutorResult<U256> {
        if let Some(limit) = override_limit {
            return Ok(limit);
        }
        if let Some(limit) = self.configured_limit {
            return Ok(U256::from(limit));
        }

        let estimate = client.estimate_gas(tx).await.map_err(|e| match e.revert_reason() {
            // Estimation executes the call: a revert here would revert on-chain too
            Some(reason) => ExecutorError::SubmissionRejected(format!(
                "gas estimation reverted: {}",
                reason
            )),
            None => ExecutorError::ChainConnection(format!("gas estimation failed: {}", e)),
        })?;

        let buffered = estimate + estimate * self.gas_limit_buffer_percent / 100;
        debug!("Gas estimate {} buffered to {}", estimate, buffered);
        Ok(buffered)
    }

    /// Resolve the gas price
    pub async fn resolve_gas_price(
        &self,
        client: &dyn ChainClient,
        override_price: Option<U256>,
    ) -> ExecutorResult<GasPrice> {
        if let Some(price) = override_price {
            return Ok(GasPrice::Legacy(price));
        }
        if let Some(price) = self.configured_price {
            return Ok(GasPrice::Legacy(U256::from(price)));
        }

        let quoted = match self.strategy {
            GasPriceStrategy::Legacy => {
                let price = client
                    .gas_price()
                    .await
                    .map_err(|e| ExecutorError::ChainConnection(format!("gas price: {}", e)))?;
                GasPrice::Legacy(price)
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee_per_gas, max_priority_fee_per_gas) = client
                    .eip1559_fees()
                    .await
                    .map_err(|e| ExecutorError::ChainConnection(format!("fee estimate: {}", e)))?;
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                }
            }
        };

        let buffered = self.buffered(quoted);
        debug!("Gas price quote {:?} buffered to {:?}", quoted, buffered);
        Ok(buffered)
    }

    fn buffered(&self, price: GasPrice) -> GasPrice {
        match price {
            GasPrice::Legacy(price) => {
                let buffer = price * self.gas_price_buffer_percent / 100;
                GasPrice::Legacy(price + buffer)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let fee_buffer = max_fee_per_gas * self.gas_price_buffer_percent / 100;
                let priority_buffer =
                    max_priority_fee_per_gas * self.gas_price_buffer_percent / 100;
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee_per_gas + fee_buffer,
                    max_priority_fee_per_gas: max_priority_fee_per_gas + priority_buffer,
                }
            }
        }
    }

    /// Calculate worst-case gas cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit.saturating_mul(*price),
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit.saturating_mul(*max_fee_per_gas),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ClientError, MockChainClient};
    use ethers::types::TransactionRequest;

    fn tx() -> TypedTransaction {
        TransactionRequest::new().into()
    }

    #[tokio::test]
    async fn test_override_beats_config() {
        let client = MockChainClient::new();
        let estimator = GasEstimator::new(GasPriceStrategy::Legacy, Some(21_000), Some(7));

        let limit = estimator
            .resolve_gas_limit(&client, &tx(), Some(U256::from(90_000)))
            .await
            .unwrap();
        let price = estimator
            .resolve_gas_price(&client, Some(U256::from(9)))
            .await
            .unwrap();

        assert_eq!(limit, U256::from(90_000));
        assert_eq!(price, GasPrice::Legacy(U256::from(9)));
    }

    #[tokio::test]
    async fn test_config_beats_node() {
        let client = MockChainClient::new();
        let estimator =
            GasEstimator::new(GasPriceStrategy::Legacy, Some(21_000), Some(50_000_000_000));

        let limit = estimator.resolve_gas_limit(&client, &tx(), None).await.unwrap();
        let price = estimator.resolve_gas_price(&client, None).await.unwrap();

        assert_eq!(limit, U256::from(21_000));
        assert_eq!(price, GasPrice::Legacy(U256::from(50_000_000_000u64)));
    }

    #[tokio::test]
    async fn test_node_quotes_are_buffered() {
        let mut client = MockChainClient::new();
        client
            .expect_estimate_gas()
            .times(1)
            .returning(|_| Ok(U256::from(100_000)));
        client
            .expect_gas_price()
            .times(1)
            .returning(|| Ok(U256::from(1_000)));
        let estimator = GasEstimator::new(GasPriceStrategy::Legacy, None, None);

        let limit = estimator.resolve_gas_limit(&client, &tx(), None).await.unwrap();
        let price = estimator.resolve_gas_price(&client, None).await.unwrap();

        assert_eq!(limit, U256::from(120_000));
        assert_eq!(price, GasPrice::Legacy(U256::from(1_100)));
    }

    #[tokio::test]
    async fn test_eip1559_quote() {
        let mut client = MockChainClient::new();
        client
            .expect_eip1559_fees()
            .returning(|| Ok((U256::from(200), U256::from(10))));
        let estimator = GasEstimator::new(GasPriceStrategy::Eip1559, None, None);

        let price = estimator.resolve_gas_price(&client, None).await.unwrap();
        assert_eq!(
            price,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(220),
                max_priority_fee_per_gas: U256::from(11),
            }
        );
    }

    #[tokio::test]
    async fn test_estimation_revert_is_rejection() {
        let mut client = MockChainClient::new();
        client.expect_estimate_gas().returning(|_| {
            Err(ClientError::Rpc {
                code: 3,
                message: "execution reverted: paused".to_string(),
                data: None,
            })
        });
        let estimator = GasEstimator::new(GasPriceStrategy::Legacy, None, None);

        let err = estimator
            .resolve_gas_limit(&client, &tx(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::SubmissionRejected(ref m) if m.contains("paused")));
    }

    #[test]
    fn test_calculate_cost() {
        let legacy = GasPrice::Legacy(U256::from(50));
        assert_eq!(
            GasEstimator::calculate_cost(U256::from(21_000), &legacy),
            U256::from(1_050_000)
        );

        let eip1559 = GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(100),
            max_priority_fee_per_gas: U256::from(2),
        };
        assert_eq!(
            GasEstimator::calculate_cost(U256::from(10), &eip1559),
            U256::from(1_000)
        );
    }
}
