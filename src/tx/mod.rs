//! Transaction building blocks: nonce sequencing, gas resolution, parameters

mod gas;
mod nonce;
mod params;

pub use gas::{GasEstimator, GasPrice};
pub use nonce::{NonceLease, NonceManager};
pub use params::TransactionParams;
