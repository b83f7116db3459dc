//! Transactions and transaction-related structures.

mod hash;
mod memo;
mod sighash;

pub use hash::Hash;
pub use memo::{Memo, MAX_MEMO_BYTES};
pub use sighash::{sighash, SIGHASH_ALL};

use crate::shielded::{OutputDescription, SpendDescription};
use crate::varint::VarInt;
use serde_big_array::BigArray;
use crate::transparent;
use crate::{SerializationError, WireDeserialize, WireSerialize};
use wire_serde_derive::{WireDeser, WireSer};

/// The kind tag of a transaction, determining which validation path applies.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TxType {
    /// Plain transparent value transfer.
    Transparent,
    /// Fully shielded transfer: value moves between notes.
    Shielded,
    /// A transfer with both transparent and shielded sides.
    Mixed,
    /// Issue a new token with a unique symbol.
    TokenIssue,
    /// Transfer token balance between transparent addresses.
    TokenTransfer,
    /// Mint additional supply of an owned token.
    TokenMint,
    /// Hand token ownership to another address.
    TokenTransferOwnership,
    /// Move token balance into or between shielded notes.
    TokenShielded,
    /// Destroy token supply.
    TokenBurn,
    /// Deploy contract code.
    SmartContractDeploy,
    /// Call a deployed contract.
    SmartContractCall,
}

impl TxType {
    pub fn is_token_operation(self) -> bool {
        matches!(
            self,
            TxType::TokenIssue
                | TxType::TokenTransfer
                | TxType::TokenMint
                | TxType::TokenTransferOwnership
                | TxType::TokenShielded
                | TxType::TokenBurn
        )
    }

    pub fn is_contract_operation(self) -> bool {
        matches!(self, TxType::SmartContractDeploy | TxType::SmartContractCall)
    }
}

impl WireSerialize for TxType {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        let tag: u8 = match self {
            TxType::Transparent => 0,
            TxType::Shielded => 1,
            TxType::Mixed => 2,
            TxType::TokenIssue => 3,
            TxType::TokenTransfer => 4,
            TxType::TokenMint => 5,
            TxType::TokenTransferOwnership => 6,
            TxType::TokenShielded => 7,
            TxType::TokenBurn => 8,
            TxType::SmartContractDeploy => 9,
            TxType::SmartContractCall => 10,
        };
        (&tag).wire_serialize(&mut target)
    }
}

impl WireDeserialize for TxType {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(match u8::wire_deserialize(&mut reader)? {
            0 => TxType::Transparent,
            1 => TxType::Shielded,
            2 => TxType::Mixed,
            3 => TxType::TokenIssue,
            4 => TxType::TokenTransfer,
            5 => TxType::TokenMint,
            6 => TxType::TokenTransferOwnership,
            7 => TxType::TokenShielded,
            8 => TxType::TokenBurn,
            9 => TxType::SmartContractDeploy,
            10 => TxType::SmartContractCall,
            _ => return Err(SerializationError::Parse("unknown transaction type tag")),
        })
    }
}

/// An Umbra transaction.
///
/// Every transaction carries the full field set; transparent-only
/// transactions simply have empty shielded sides and a zero value balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, WireSer, WireDeser)]
pub struct Transaction {
    /// The transaction version.
    pub version: i32,
    /// The kind tag, selecting the validation path.
    pub tx_type: TxType,
    /// The transparent inputs.
    pub inputs: Vec<transparent::Input>,
    /// The transparent outputs.
    pub outputs: Vec<transparent::Output>,
    /// Earliest block height or time at which the transaction may be mined.
    pub lock_time: u32,
    /// Height after which an unmined transaction expires; zero disables.
    pub expiry_height: u32,
    /// Net value flowing from the shielded pool into the transparent pool.
    pub value_balance: i64,
    /// Spends of existing shielded notes.
    pub shielded_spends: Vec<SpendDescription>,
    /// Newly created shielded notes.
    pub shielded_outputs: Vec<OutputDescription>,
    /// The signature binding the value commitments to `value_balance`.
    #[serde(with = "BigArray")]
    pub binding_sig: [u8; 64],
    /// Free-form memo; token operations encode their payload here.
    pub memo: Memo,
    /// Gas ceiling for contract transactions.
    pub gas_limit: u64,
    /// Offered gas price in satoshis per unit.
    pub gas_price: u64,
    /// Gas consumed, filled in after execution.
    pub gas_used: u64,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: i32,
        tx_type: TxType,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        lock_time: u32,
        memo: Memo,
    ) -> Transaction {
        Transaction {
            version,
            tx_type,
            inputs,
            outputs,
            lock_time,
            expiry_height: 0,
            value_balance: 0,
            shielded_spends: Vec::new(),
            shielded_outputs: Vec::new(),
            binding_sig: [0; 64],
            memo,
            gas_limit: 0,
            gas_price: 0,
            gas_used: 0,
        }
    }

    /// The fingerprint of this transaction, computed over its canonical
    /// bytes. Transactions are fingerprinted rarely enough (admission,
    /// block commit) that no cache slot is carried for it.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    pub fn contains_coinbase_input(&self) -> bool {
        self.inputs.iter().any(|input| input.is_coinbase())
    }

    /// Whether the transaction carries any shielded spends or outputs.
    pub fn has_shielded_components(&self) -> bool {
        !self.shielded_spends.is_empty()
            || !self.shielded_outputs.is_empty()
            || self.value_balance != 0
    }

    /// Returns the serialized length (in bytes) of this transaction.
    pub fn serialized_size(&self) -> usize {
        let mut size = 4 + 1;
        size += VarInt::size(self.inputs.len());
        for input in self.inputs.iter() {
            size += input.serialized_size();
        }
        size += VarInt::size(self.outputs.len());
        for output in self.outputs.iter() {
            size += output.serialized_size();
        }
        size += 4 + 4 + 8;
        size += VarInt::size(self.shielded_spends.len())
            + self.shielded_spends.len() * SpendDescription::serialized_size();
        size += VarInt::size(self.shielded_outputs.len())
            + self.shielded_outputs.len() * OutputDescription::serialized_size();
        size += 64;
        size += self.memo.serialized_size();
        size + 8 + 8 + 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transparent::{OutPoint, Script};

    pub(crate) fn dummy_transparent_tx() -> Transaction {
        Transaction::new(
            1,
            TxType::Transparent,
            vec![transparent::Input {
                previous_outpoint: OutPoint {
                    hash: Hash([9; 32]),
                    index: 1,
                },
                signature_script: Script(vec![0xde, 0xad]),
                sequence: 0xffff_ffff,
            }],
            vec![transparent::Output {
                value: 50_000,
                pk_script: Script::pay_to_pubkey_hash(&[7; 20]),
            }],
            0,
            Memo::empty(),
        )
    }

    #[test]
    fn roundtrip_matches_serialized_size() {
        let tx = dummy_transparent_tx();
        let bytes = tx.wire_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), tx.serialized_size());

        let parsed = Transaction::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(tx, parsed);
        assert_eq!(tx.hash(), parsed.hash());
    }

    #[test]
    fn coinbase_structure_is_detected() {
        let mut tx = dummy_transparent_tx();
        assert!(!tx.is_coinbase());
        tx.inputs = vec![transparent::Input {
            previous_outpoint: OutPoint::coinbase_sentinel(),
            signature_script: Script(vec![1, 2, 3]),
            sequence: 0,
        }];
        assert!(tx.is_coinbase());
        assert!(tx.contains_coinbase_input());
    }

    #[test]
    fn unknown_tx_type_tag_is_rejected() {
        let tx = dummy_transparent_tx();
        let mut bytes = tx.wire_serialize_to_vec().unwrap();
        // The tag is the byte right after the 4-byte version.
        bytes[4] = 42;
        assert!(Transaction::wire_deserialize(&bytes[..]).is_err());
    }
}
