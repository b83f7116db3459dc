//! Core chain data structures and consensus serialization for Umbra.
//!
//! This crate defines the wire model (blocks, transactions, shielded
//! descriptors), chain parameters, and the difficulty/compact-target math.
//! It contains no I/O and no chain state; those live in `umbra-state` and
//! `umbra-consensus`.
#![allow(clippy::unit_arg)]

#[macro_use]
extern crate serde;

pub mod amount;
pub mod block;
pub mod parameters;
pub mod serialization;
pub mod shielded;
pub mod tokens;
pub mod transaction;
pub mod transparent;
pub mod varint;
pub mod work;

pub use serialization::{SerializationError, WireDeserialize, WireDeserializeInto, WireSerialize};
