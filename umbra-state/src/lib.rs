//! Persistent chain state for Umbra: block storage, the UTXO engine, and
//! the shielded pool, all backed by sled trees.
//!
//! This crate owns durability and atomicity; consensus rules live in
//! `umbra-consensus`. Every mutating operation here runs inside a sled
//! multi-tree transaction so that a crash can never expose a half-applied
//! block.

#[macro_use]
extern crate serde;

mod error;
mod shielded;
mod store;
mod utxo;

pub use error::StateError;
pub use shielded::{
    NoteCommitmentTree, ProofVerifier, ShieldedPool, StructuralVerifier, VALUE_BALANCE_LIMIT,
};
pub use store::{Config, Store};
pub use utxo::{UtxoEngine, UtxoEntry};
