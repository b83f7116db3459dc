//! Definitions of network messages.

use std::sync::Arc;

use umbra_chain::{
    block::{Block, CountedHeader},
    transaction::Transaction,
};

use super::command::Command;
use super::inv::Inventory;

mod compact_block;
mod locator;
mod reject;
mod version;

pub use compact_block::{short_id, BlockTxn, CompactBlock, GetBlockTxn, PrefilledTransaction, SendCompact};
pub use locator::BlockLocator;
pub use reject::{Reject, RejectReason};
pub use version::Version;

/// A nonce carried by ping/pong pairs and compact-block negotiation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Nonce(pub u64);

/// An Umbra network message.
///
/// The wire format identifies messages by a 12-byte ASCII command string;
/// this enum stores the internal representation, and the translation
/// between the two happens only inside the codec. The enum discriminant is
/// therefore also the validation boundary for inbound messages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    /// Opens a handshake; analogous to a TLS `ClientHello`.
    Version(Version),

    /// Acknowledges a validated `version`.
    Verack,

    /// Liveness probe; the receiver echoes the nonce in a `pong`.
    Ping(Nonce),

    /// The answer to a `ping`.
    Pong(Nonce),

    /// Tells a peer why its message was not accepted.
    Reject(Reject),

    /// Asks for a batch of known peer addresses.
    GetAddr,

    /// Shares known peer addresses.
    Addr(Vec<String>),

    /// Requests headers following the locator's start hash.
    GetHeaders(BlockLocator),

    /// Headers following a `getheaders` locator, each with its block's
    /// transaction count.
    Headers(Vec<CountedHeader>),

    /// Requests block hashes following the locator's start hash; answered
    /// with an `inv`.
    GetBlocks(BlockLocator),

    /// Advertises blocks or transactions the sender has.
    Inv(Inventory),

    /// Requests the content of advertised items.
    GetData(Inventory),

    /// Items from a `getdata` the responder does not have.
    NotFound(Inventory),

    /// A whole serialized block.
    Block(Arc<Block>),

    /// A single transaction.
    Tx(Arc<Transaction>),

    /// Asks the receiver to advertise its mempool contents.
    Mempool,

    /// A compact block relay: header, nonce, short IDs, prefilled slots.
    CompactBlock(CompactBlock),

    /// Requests the transactions missing from a compact block.
    GetBlockTxn(GetBlockTxn),

    /// The transactions answering a `getblocktxn`.
    BlockTxn(BlockTxn),

    /// Negotiates compact-block relay.
    SendCompact(SendCompact),

    /// Asks the sender not to relay transactions below this rate
    /// (satoshis per kilobyte).
    FeeFilter(i64),

    /// Asks for headers-first block announcements.
    SendHeaders,

    /// A command outside the enforced set. Never sent; receipt is a
    /// protocol violation.
    Unknown(String),
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.command().name())
    }
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version { .. } => Command::Version,
            Message::Verack => Command::Verack,
            Message::Ping { .. } => Command::Ping,
            Message::Pong { .. } => Command::Pong,
            Message::Reject { .. } => Command::Reject,
            Message::GetAddr => Command::GetAddr,
            Message::Addr { .. } => Command::Addr,
            Message::GetHeaders { .. } => Command::GetHeaders,
            Message::Headers { .. } => Command::Headers,
            Message::GetBlocks { .. } => Command::GetBlocks,
            Message::Inv { .. } => Command::Inv,
            Message::GetData { .. } => Command::GetData,
            Message::NotFound { .. } => Command::NotFound,
            Message::Block { .. } => Command::Block,
            Message::Tx { .. } => Command::Tx,
            Message::Mempool => Command::Mempool,
            Message::CompactBlock { .. } => Command::CmpctBlock,
            Message::GetBlockTxn { .. } => Command::GetBlockTxn,
            Message::BlockTxn { .. } => Command::BlockTxn,
            Message::SendCompact { .. } => Command::SendCmpct,
            Message::FeeFilter { .. } => Command::FeeFilter,
            Message::SendHeaders => Command::SendHeaders,
            Message::Unknown(name) => Command::Unknown(name.clone()),
        }
    }
}
