//! Inventory announcements: typed batches of hashes.

use std::io::{Read, Write};

use umbra_chain::{block, transaction, SerializationError, WireDeserialize, WireSerialize};

/// What an inventory batch refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InvKind {
    Block,
    Tx,
}

impl WireSerialize for InvKind {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        let code: u8 = match self {
            InvKind::Block => 1,
            InvKind::Tx => 2,
        };
        (&code).wire_serialize(&mut writer)
    }
}

impl WireDeserialize for InvKind {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        match u8::wire_deserialize(&mut reader)? {
            1 => Ok(InvKind::Block),
            2 => Ok(InvKind::Tx),
            _ => Err(SerializationError::Parse("invalid inventory kind")),
        }
    }
}

/// A batch of advertised or requested hashes, all of one kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Inventory {
    pub kind: InvKind,
    pub hashes: Vec<[u8; 32]>,
}

impl Inventory {
    pub fn blocks<I: IntoIterator<Item = block::Hash>>(hashes: I) -> Inventory {
        Inventory {
            kind: InvKind::Block,
            hashes: hashes.into_iter().map(|hash| hash.0).collect(),
        }
    }

    pub fn txs<I: IntoIterator<Item = transaction::Hash>>(hashes: I) -> Inventory {
        Inventory {
            kind: InvKind::Tx,
            hashes: hashes.into_iter().map(|hash| hash.0).collect(),
        }
    }

    pub fn block_hashes(&self) -> impl Iterator<Item = block::Hash> + '_ {
        self.hashes.iter().map(|&bytes| block::Hash(bytes))
    }

    pub fn tx_hashes(&self) -> impl Iterator<Item = transaction::Hash> + '_ {
        self.hashes.iter().map(|&bytes| transaction::Hash(bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl WireSerialize for Inventory {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        self.kind.wire_serialize(&mut writer)?;
        self.hashes.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for Inventory {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Inventory {
            kind: InvKind::wire_deserialize(&mut reader)?,
            hashes: Vec::<[u8; 32]>::wire_deserialize(&mut reader)?,
        })
    }
}
