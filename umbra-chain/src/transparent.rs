//! Transparent-value (Bitcoin-inherited) transaction structures.

mod script;

pub use script::Script;

use crate::{transaction, SerializationError, WireDeserialize, WireSerialize};
use wire_serde_derive::{WireDeser, WireSer};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// The previous-output index that marks a coinbase input.
pub const COINBASE_SENTINEL_INDEX: u32 = 0xFFFF_FFFF;

/// OutPoint
///
/// A particular transaction output reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash, WireSer, WireDeser)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct OutPoint {
    /// References the transaction that contains the UTXO being spent.
    pub hash: transaction::Hash,

    /// Identifies which UTXO from that transaction is referenced; the first
    /// output is 0, etc.
    pub index: u32,
}

impl OutPoint {
    #[inline]
    pub const fn len() -> usize {
        36
    }

    /// The sentinel outpoint carried by coinbase inputs: a zero hash and an
    /// all-ones index.
    pub const fn coinbase_sentinel() -> OutPoint {
        OutPoint {
            hash: transaction::Hash([0; 32]),
            index: COINBASE_SENTINEL_INDEX,
        }
    }

    pub fn is_coinbase_sentinel(&self) -> bool {
        self.hash.0 == [0; 32] && self.index == COINBASE_SENTINEL_INDEX
    }

    /// The 36-byte store key for this outpoint: tx hash followed by the
    /// little-endian index.
    pub fn to_key(&self) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[..32].copy_from_slice(&self.hash.0);
        key[32..].copy_from_slice(&self.index.to_le_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Result<OutPoint, SerializationError> {
        if key.len() != 36 {
            return Err(SerializationError::Parse("outpoint key must be 36 bytes"));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&key[..32]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&key[32..]);
        Ok(OutPoint {
            hash: transaction::Hash(hash),
            index: u32::from_le_bytes(index),
        })
    }
}

/// A transparent input to a transaction.
///
/// Coinbase inputs are not a separate variant: they carry the sentinel
/// outpoint and use `signature_script` as free miner data.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, WireSer, WireDeser)]
pub struct Input {
    /// The previous output transaction reference.
    pub previous_outpoint: OutPoint,
    /// The script that authorizes spending `previous_outpoint`.
    pub signature_script: Script,
    /// The sequence number for the input.
    pub sequence: u32,
}

impl Input {
    pub fn is_coinbase(&self) -> bool {
        self.previous_outpoint.is_coinbase_sentinel()
    }

    /// Returns the serialized length (in bytes) of this input.
    pub fn serialized_size(&self) -> usize {
        OutPoint::len() + self.signature_script.serialized_size() + 4
    }
}

/// A transparent output from a transaction.
///
/// UTXOs are indivisible, discrete units of value which can only be consumed
/// in their entirety; change is returned as a fresh output.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash, WireSer, WireDeser)]
pub struct Output {
    /// Transaction value in satoshis. Negative values are rejected by
    /// validation, not by this type.
    pub value: i64,

    /// The lock script defines the conditions under which this output can be
    /// spent.
    pub pk_script: Script,
}

impl Output {
    /// Returns the serialized length (in bytes) of this output.
    pub fn serialized_size(&self) -> usize {
        8 + self.pk_script.serialized_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpoint_key_roundtrip() {
        let outpoint = OutPoint {
            hash: transaction::Hash([0xab; 32]),
            index: 7,
        };
        let key = outpoint.to_key();
        assert_eq!(OutPoint::from_key(&key).unwrap(), outpoint);
        assert_eq!(&key[32..], &7u32.to_le_bytes());
    }

    #[test]
    fn coinbase_sentinel_detection() {
        assert!(OutPoint::coinbase_sentinel().is_coinbase_sentinel());
        let normal = OutPoint {
            hash: transaction::Hash([1; 32]),
            index: 0,
        };
        assert!(!normal.is_coinbase_sentinel());
    }
}
