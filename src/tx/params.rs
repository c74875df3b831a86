//! Fully resolved transaction parameters

use super::gas::{GasEstimator, GasPrice};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, U256};
use serde::Serialize;

/// Everything needed to sign one transaction. Built fresh per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionParams {
    pub chain_id: u64,
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub data: Bytes,
    pub nonce: U256,
    pub gas_limit: U256,
    pub gas_price: GasPrice,
    pub value: Option<U256>,
}

impl TransactionParams {
    /// Worst-case amount the sender must hold: gas at the cap plus value
    pub fn max_cost(&self) -> U256 {
        GasEstimator::calculate_cost(self.gas_limit, &self.gas_price)
            .saturating_add(self.value.unwrap_or_default())
    }

    /// Build the typed transaction to sign
    pub fn to_typed(&self) -> TypedTransaction {
        match self.gas_price {
            GasPrice::Legacy(price) => {
                let mut tx = TransactionRequest::new()
                    .from(self.from)
                    .data(self.data.clone())
                    .nonce(self.nonce)
                    .gas(self.gas_limit)
                    .gas_price(price)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                if let Some(value) = self.value {
                    tx = tx.value(value);
                }
                TypedTransaction::Legacy(tx)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(self.from)
                    .data(self.data.clone())
                    .nonce(self.nonce)
                    .gas(self.gas_limit)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                if let Some(value) = self.value {
                    tx = tx.value(value);
                }
                TypedTransaction::Eip1559(tx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(gas_price: GasPrice) -> TransactionParams {
        TransactionParams {
            chain_id: 31337,
            from: Address::from_low_u64_be(1),
            to: Some(Address::from_low_u64_be(0xBEEF)),
            data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
            nonce: U256::from(5),
            gas_limit: U256::from(60_000),
            gas_price,
            value: Some(U256::from(7)),
        }
    }

    #[test]
    fn test_legacy_typed_transaction() {
        let tx = params(GasPrice::Legacy(U256::from(50))).to_typed();
        assert!(matches!(tx, TypedTransaction::Legacy(_)));
        assert_eq!(tx.nonce(), Some(&U256::from(5)));
        assert_eq!(tx.gas(), Some(&U256::from(60_000)));
        assert_eq!(tx.gas_price(), Some(U256::from(50)));
        assert_eq!(tx.value(), Some(&U256::from(7)));
        assert_eq!(tx.chain_id().map(|id| id.as_u64()), Some(31337));
    }

    #[test]
    fn test_eip1559_typed_transaction() {
        let tx = params(GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(100),
            max_priority_fee_per_gas: U256::from(2),
        })
        .to_typed();
        assert!(matches!(tx, TypedTransaction::Eip1559(_)));
        assert_eq!(tx.nonce(), Some(&U256::from(5)));
    }

    #[test]
    fn test_contract_creation_has_no_recipient() {
        let mut p = params(GasPrice::Legacy(U256::from(1)));
        p.to = None;
        assert!(p.to_typed().to().is_none());
    }

    #[test]
    fn test_max_cost_includes_value() {
        let p = params(GasPrice::Legacy(U256::from(50)));
        assert_eq!(p.max_cost(), U256::from(60_000 * 50 + 7));
    }
}
