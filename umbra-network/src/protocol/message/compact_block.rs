//! Compact-block relay messages.
//!
//! Umbra negotiates compact relay (`sendcmpct`, version 1) after every
//! handshake, but its processor is a decode-and-fall-back pass-through:
//! receipt of a `cmpctblock` triggers a full `getdata`. The messages and
//! short-ID construction are wire-complete so upgraded peers interoperate.

use umbra_chain::block::{self, Header};
use umbra_chain::varint::VarInt;
use umbra_chain::serialization::sha256d;
use umbra_chain::transaction::{self, Transaction};
use umbra_chain::{SerializationError, WireDeserialize, WireSerialize};

/// A transaction sent along with a compact block, keyed by its slot index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrefilledTransaction {
    pub index: u64,
    pub tx: Transaction,
}

impl WireSerialize for PrefilledTransaction {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        VarInt::from(self.index as usize).wire_serialize(&mut target)?;
        self.tx.wire_serialize(&mut target)
    }
}

impl WireDeserialize for PrefilledTransaction {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(PrefilledTransaction {
            index: VarInt::wire_deserialize(&mut reader)?.value(),
            tx: Transaction::wire_deserialize(&mut reader)?,
        })
    }
}

/// A `cmpctblock` message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompactBlock {
    pub header: Header,
    pub nonce: u64,
    /// 6-byte short transaction IDs, little-endian in a u64.
    pub short_ids: Vec<u64>,
    pub prefilled: Vec<PrefilledTransaction>,
}

impl WireSerialize for CompactBlock {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.header.wire_serialize(&mut target)?;
        self.nonce.wire_serialize(&mut target)?;
        VarInt::from(self.short_ids.len()).wire_serialize(&mut target)?;
        for id in self.short_ids.iter() {
            target.write_all(&id.to_le_bytes()[..6])?;
        }
        self.prefilled.wire_serialize(&mut target)
    }
}

impl WireDeserialize for CompactBlock {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let header = Header::wire_deserialize(&mut reader)?;
        let nonce = u64::wire_deserialize(&mut reader)?;
        let count = VarInt::wire_deserialize(&mut reader)?.value() as usize;
        let mut short_ids = Vec::with_capacity(std::cmp::min(count, 1024));
        for _ in 0..count {
            let mut bytes = [0u8; 8];
            std::io::Read::read_exact(&mut reader, &mut bytes[..6])?;
            short_ids.push(u64::from_le_bytes(bytes));
        }
        Ok(CompactBlock {
            header,
            nonce,
            short_ids,
            prefilled: Vec::<PrefilledTransaction>::wire_deserialize(&mut reader)?,
        })
    }
}

/// A `getblocktxn` message: slot indexes missing from a compact block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GetBlockTxn {
    pub block_hash: block::Hash,
    pub indexes: Vec<u64>,
}

impl WireSerialize for GetBlockTxn {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.block_hash.wire_serialize(&mut target)?;
        VarInt::from(self.indexes.len()).wire_serialize(&mut target)?;
        for index in self.indexes.iter() {
            VarInt::from(*index as usize).wire_serialize(&mut target)?;
        }
        Ok(())
    }
}

impl WireDeserialize for GetBlockTxn {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let block_hash = block::Hash::wire_deserialize(&mut reader)?;
        let count = VarInt::wire_deserialize(&mut reader)?.value() as usize;
        let mut indexes = Vec::with_capacity(std::cmp::min(count, 1024));
        for _ in 0..count {
            indexes.push(VarInt::wire_deserialize(&mut reader)?.value());
        }
        Ok(GetBlockTxn {
            block_hash,
            indexes,
        })
    }
}

/// A `blocktxn` message: the transactions answering a `getblocktxn`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockTxn {
    pub block_hash: block::Hash,
    pub transactions: Vec<Transaction>,
}

impl WireSerialize for BlockTxn {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.block_hash.wire_serialize(&mut target)?;
        self.transactions.wire_serialize(&mut target)
    }
}

impl WireDeserialize for BlockTxn {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(BlockTxn {
            block_hash: block::Hash::wire_deserialize(&mut reader)?,
            transactions: Vec::<Transaction>::wire_deserialize(&mut reader)?,
        })
    }
}

/// A `sendcmpct` message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SendCompact {
    pub announce: bool,
    pub version: u64,
}

impl WireSerialize for SendCompact {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.announce.wire_serialize(&mut target)?;
        self.version.wire_serialize(&mut target)
    }
}

impl WireDeserialize for SendCompact {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(SendCompact {
            announce: bool::wire_deserialize(&mut reader)?,
            version: u64::wire_deserialize(&mut reader)?,
        })
    }
}

/// The 6-byte compact-block short ID of a transaction: the first six bytes
/// of `sha256d(tx_hash ‖ nonce)`.
pub fn short_id(tx_hash: &transaction::Hash, nonce: u64) -> u64 {
    let mut preimage = [0u8; 40];
    preimage[..32].copy_from_slice(&tx_hash.0);
    preimage[32..].copy_from_slice(&nonce.to_le_bytes());
    let digest = sha256d::digest(&preimage);
    let mut bytes = [0u8; 8];
    bytes[..6].copy_from_slice(&digest[..6]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use umbra_chain::block::merkle;
    use umbra_chain::work::difficulty::CompactDifficulty;

    fn header() -> Header {
        Header::new(
            1,
            block::Hash([1; 32]),
            merkle::Root([2; 32]),
            Utc.timestamp_opt(1_713_000_000, 0).single().unwrap(),
            CompactDifficulty(0x1d00ffff),
            7,
            vec![0xaa; 4],
        )
    }

    #[test]
    fn compact_block_roundtrip() {
        let msg = CompactBlock {
            header: header(),
            nonce: 0x1122_3344_5566_7788,
            short_ids: vec![0x0000_aabb_ccdd_eeff, 0x0000_0102_0304_0506],
            prefilled: vec![],
        };
        let bytes = msg.wire_serialize_to_vec().unwrap();
        assert_eq!(CompactBlock::wire_deserialize(&bytes[..]).unwrap(), msg);
    }

    #[test]
    fn short_ids_are_six_bytes() {
        let msg = CompactBlock {
            header: header(),
            nonce: 1,
            short_ids: vec![0xffff_ffff_ffff_ffff],
            prefilled: vec![],
        };
        let bytes = msg.wire_serialize_to_vec().unwrap();
        let parsed = CompactBlock::wire_deserialize(&bytes[..]).unwrap();
        // The top two bytes are dropped on the wire.
        assert_eq!(parsed.short_ids, vec![0x0000_ffff_ffff_ffff]);
    }

    #[test]
    fn short_id_depends_on_the_nonce() {
        let tx = transaction::Hash([3; 32]);
        let id = short_id(&tx, 1);
        assert!(id <= 0x0000_ffff_ffff_ffff);
        assert_ne!(id, short_id(&tx, 2));
    }

    #[test]
    fn get_block_txn_roundtrip() {
        let msg = GetBlockTxn {
            block_hash: block::Hash([4; 32]),
            indexes: vec![0, 5, 300],
        };
        let bytes = msg.wire_serialize_to_vec().unwrap();
        assert_eq!(GetBlockTxn::wire_deserialize(&bytes[..]).unwrap(), msg);
    }
}
