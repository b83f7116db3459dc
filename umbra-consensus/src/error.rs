//! The consensus error taxonomy.
//!
//! Per-block failures abort the current block and leave the chain
//! unchanged; the transactional state layer guarantees that. Storage
//! failures surface unchanged so callers can distinguish rule violations
//! from I/O trouble.

use thiserror::Error;

use umbra_chain::block;
use umbra_chain::transparent::OutPoint;
use umbra_chain::work::difficulty::CompactDifficulty;
use umbra_state::StateError;

/// Block-level validation and acceptance failures.
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("block has no transactions")]
    NoTransactions,

    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    #[error("block time outside the permitted drift window")]
    Time,

    #[error("proof of work verification failed")]
    InvalidProofOfWork,

    #[error("header bits {actual:?} do not match the required target {expected:?}")]
    WrongDifficulty {
        expected: CompactDifficulty,
        actual: CompactDifficulty,
    },

    #[error("block at checkpointed height {0:?} does not match the checkpoint")]
    CheckpointMismatch(block::Height),

    #[error("duplicate block {0:?}")]
    DuplicateBlock(block::Hash),

    #[error("block contains duplicate transactions")]
    DuplicateTransaction,

    #[error("merkle root mismatch: computed {actual:?}, header {expected:?}")]
    BadMerkleRoot {
        actual: umbra_chain::block::merkle::Root,
        expected: umbra_chain::block::merkle::Root,
    },

    #[error("block size {size} exceeds the limit {limit}")]
    OversizedBlock { size: usize, limit: u64 },

    #[error("coinbase claims {claimed} but only {allowed} is available")]
    SubsidyTooLarge { claimed: i64, allowed: i64 },

    #[error("block parent is not known")]
    OrphanBlock(block::Hash),

    #[error("fork point search failed: {0}")]
    ForkChooser(&'static str),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Transaction-level validation failures.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("coinbase must be the first transaction")]
    CoinbasePosition,

    #[error("non-first transaction contains a coinbase input")]
    CoinbaseInputFound,

    #[error("transaction has no inputs")]
    NoInputs,

    #[error("transaction has no outputs")]
    NoOutputs,

    #[error("output value {0} is negative")]
    NegativeOutput(i64),

    #[error("value sum overflowed")]
    ValueOverflow,

    #[error("inputs are worth less than outputs")]
    NegativeFee,

    #[error("fee {fee} exceeds the sanity cap {cap}")]
    FeeTooHigh { fee: i64, cap: i64 },

    #[error("input spends unknown outpoint {0:?}")]
    MissingUtxo(OutPoint),

    #[error("referenced output is not a pay-to-pubkey-hash script")]
    ScriptTemplateMismatch,

    #[error("signature script is malformed")]
    MalformedSignatureScript,

    #[error("public key does not hash to the referenced output")]
    PubkeyMismatch,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("transaction expired at height {expiry}, current {current}")]
    Expired { expiry: u32, current: u32 },

    #[error("gas limit {limit} exceeds the per-transaction cap {cap}")]
    GasLimitExceeded { limit: u64, cap: u64 },

    #[error("gas price {price} below the network minimum {min}")]
    GasPriceTooLow { price: u64, min: u64 },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("malformed transaction: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Token-operation validation failures, produced by the token ledger
/// collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token symbol {0} is already issued")]
    SymbolTaken(String),

    #[error("unknown token")]
    UnknownToken,

    #[error("operation requires the token owner")]
    NotOwner,

    #[error("insufficient token balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("token supply overflowed")]
    SupplyOverflow,

    #[error("token operation memo is malformed")]
    MalformedOperation,

    #[error("token operation kind does not match the transaction type")]
    KindMismatch,
}

/// Mempool admission failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("mempool is full")]
    PoolFull,

    #[error("transaction is already in the mempool")]
    Duplicate,

    #[error("transaction double-spends a pooled outpoint")]
    OutpointConflict,
}
