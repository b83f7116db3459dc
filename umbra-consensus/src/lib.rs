//! Consensus rules and the chain state machine for Umbra.
//!
//! Stateless checks live in [`check`]; the stateful block-acceptance
//! pipeline, including difficulty retargeting, checkpoint enforcement, and
//! reorganization, lives in [`chain`]. The mempool and fee estimator are
//! auxiliaries of the chain and are shared with the network layer.

pub mod chain;
pub mod check;
pub mod difficulty;
pub mod error;
pub mod fee_estimator;
pub mod mempool;
pub mod pow;
pub mod subsidy;
pub mod tokens;
pub mod transaction;

pub use chain::{Chain, ProcessOutcome};
pub use error::{BlockError, MempoolError, TokenError, TransactionError};
pub use fee_estimator::FeeEstimator;
pub use mempool::Mempool;
pub use pow::{PowEngine, Sha256dPow, Solution};
pub use tokens::{MemoryTokenLedger, TokenLedger};
