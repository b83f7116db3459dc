//! The Umbra peer-to-peer synchronization engine.
//!
//! One logical task per peer with strict read/write ordering, a concurrent
//! bidirectional handshake, framed messages over TCP, misbehavior scoring
//! with banning, and reconnection with exponential backoff. Blocks flow to
//! the chain state machine, transactions to the mempool, and both are
//! re-announced to every other peer on acceptance.

#[macro_use]
extern crate serde;

pub mod config;
pub mod connection;
pub mod constants;
pub mod handshake;
pub mod peer;
pub mod peer_set;
pub mod protocol;
pub mod server;

pub use config::NetworkConfig;
pub use peer::{Behaviour, Peer};
pub use peer_set::PeerSet;
pub use protocol::message::Message;
pub use server::SyncEngine;
