use thiserror::Error;
use umbra_chain::transparent::OutPoint;

/// Errors surfaced by the persistent state layer.
#[derive(Error, Debug)]
pub enum StateError {
    /// A store-level I/O or transaction failure. Fatal to the current
    /// operation; state is unchanged because all writes are transactional.
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),

    /// Stored bytes did not decode; the database is damaged.
    #[error("corrupt state entry: {0}")]
    Corrupt(&'static str),

    /// A spend referenced an outpoint the UTXO engine does not know.
    #[error("missing utxo for outpoint {0:?}")]
    MissingUtxo(OutPoint),

    /// A shielded spend reused a live nullifier: the shielded double-spend
    /// signal.
    #[error("invalid nullifier: already spent")]
    InvalidNullifier,

    /// A shielded output repeated an existing note commitment.
    #[error("duplicate note commitment")]
    DuplicateCommitment,

    /// A shielded spend referenced an anchor outside the recent root
    /// history.
    #[error("unknown commitment tree anchor")]
    UnknownAnchor,

    /// A proof object failed the (structural) verifier predicate.
    #[error("invalid shielded proof")]
    InvalidShieldedProof,

    /// A transaction's value balance fell outside the permitted window.
    #[error("invalid value balance: {0}")]
    InvalidValueBalance(i64),

    /// A rollback was requested for a block with no journal entry.
    #[error("no spend journal for block {0}")]
    MissingJournal(umbra_chain::block::Hash),
}

impl StateError {
    /// True for the shielded double-spend rejection, which callers
    /// distinguish from other shielded failures.
    pub fn is_invalid_nullifier(&self) -> bool {
        matches!(self, StateError::InvalidNullifier)
    }
}

impl From<sled::transaction::TransactionError<StateError>> for StateError {
    fn from(err: sled::transaction::TransactionError<StateError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(storage) => StateError::Storage(storage),
        }
    }
}
