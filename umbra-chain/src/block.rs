//! Blocks and block-related structures (heights, headers, etc.)

mod hash;
mod header;
mod height;

pub mod merkle;


use std::{convert::TryInto, fmt, sync::Arc};

use crate::varint::VarInt;
use crate::transaction::Transaction;
use crate::{SerializationError, WireDeserialize, WireSerialize};
use wire_serde_derive::WireSer;

pub use hash::Hash;
pub use header::Header;
pub use header::{CountedHeader, MAX_SOLUTION_BYTES};
pub use height::Height;

/// An Umbra block, containing a header and a list of transactions.
///
/// The first transaction is always the coinbase; callers get structural
/// enforcement from `umbra-consensus`, not from this type.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, WireSer)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions.
    pub transactions: Vec<Arc<Transaction>>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &self.hash())
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

impl Block {
    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    /// The coinbase transaction, if the block has one in first position.
    pub fn coinbase(&self) -> Option<&Arc<Transaction>> {
        self.transactions.get(0).filter(|tx| tx.is_coinbase())
    }

    /// Returns the serialized length (in bytes) of this block.
    pub fn serialized_size(&self) -> usize {
        let mut size = self.header.serialized_size() + VarInt::size(self.transactions.len());
        for tx in self.transactions.iter() {
            size += tx.serialized_size();
        }
        size
    }

    /// Deserialize a block, bounding reads to `max_block_bytes`.
    ///
    /// The transaction-count sanity bound prevents a hostile length prefix
    /// from forcing a huge allocation before the body is even read.
    pub fn wire_deserialize_with_limit<R: std::io::Read>(
        mut reader: R,
        max_block_bytes: u64,
    ) -> Result<Self, SerializationError> {
        let header = Header::wire_deserialize(&mut reader)?;

        let mut reader = reader.take(max_block_bytes);
        let tx_count = VarInt::wire_deserialize(&mut reader)?.value();
        if tx_count > max_block_bytes / (36 * 4) {
            return Err(SerializationError::Parse(
                "block contained too many transactions for each to have at least one input",
            ));
        }
        let mut transactions = Vec::with_capacity(
            tx_count
                .try_into()
                .expect("tx count bounded by max_block_bytes"),
        );
        for _ in 0..tx_count {
            transactions.push(<Arc<Transaction>>::wire_deserialize(&mut reader)?);
        }
        Ok(Block {
            header,
            transactions,
        })
    }
}

impl WireDeserialize for Block {
    fn wire_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        // The network codec enforces its own payload ceiling before this runs.
        Block::wire_deserialize_with_limit(reader, u64::MAX)
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Hash {
        (&block.header).into()
    }
}
