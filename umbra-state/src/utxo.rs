//! The UTXO engine: a persistent outpoint → unspent-output mapping with
//! transactional apply/rollback of whole blocks.
//!
//! Trees:
//!   - `utxo`:          36-byte outpoint key → serialized entry
//!   - `spent_journal`: block hash → the entries that block consumed
//!
//! The journal is what makes `rollback_block` a true inverse of
//! `apply_block`: every entry removed by a connect is re-inserted verbatim
//! by the matching disconnect.

use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use umbra_chain::block::{Block, Height};
use umbra_chain::transaction::Transaction;
use umbra_chain::transparent::{OutPoint, Script};

use crate::{StateError, Store};

/// One unspent output, as stored on disk.
///
/// Layout (consensus-fixed for on-disk compatibility):
/// `tx_hash(32) ‖ index(4 LE) ‖ value(8 LE i64) ‖ height(4 LE i32) ‖
///  script_len(2 LE) ‖ script`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoEntry {
    pub tx_hash: umbra_chain::transaction::Hash,
    pub index: u32,
    pub value: i64,
    pub pk_script: Script,
    pub height: i32,
}

impl UtxoEntry {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            hash: self.tx_hash,
            index: self.index,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let script = &self.pk_script.0;
        let mut bytes = Vec::with_capacity(50 + script.len());
        bytes.extend_from_slice(&self.tx_hash.0);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.value.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&(script.len() as u16).to_le_bytes());
        bytes.extend_from_slice(script);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<UtxoEntry, StateError> {
        if bytes.len() < 50 {
            return Err(StateError::Corrupt("utxo entry shorter than its header"));
        }
        let mut tx_hash = [0u8; 32];
        tx_hash.copy_from_slice(&bytes[0..32]);
        let mut quad = [0u8; 4];
        quad.copy_from_slice(&bytes[32..36]);
        let index = u32::from_le_bytes(quad);
        let mut oct = [0u8; 8];
        oct.copy_from_slice(&bytes[36..44]);
        let value = i64::from_le_bytes(oct);
        quad.copy_from_slice(&bytes[44..48]);
        let height = i32::from_le_bytes(quad);
        let mut pair = [0u8; 2];
        pair.copy_from_slice(&bytes[48..50]);
        let script_len = u16::from_le_bytes(pair) as usize;
        if bytes.len() != 50 + script_len {
            return Err(StateError::Corrupt("utxo entry length mismatch"));
        }
        Ok(UtxoEntry {
            tx_hash: umbra_chain::transaction::Hash(tx_hash),
            index,
            value,
            pk_script: Script(bytes[50..].to_vec()),
            height,
        })
    }
}

/// Journal payload: a count followed by length-prefixed serialized entries.
fn encode_journal(entries: &[UtxoEntry]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        let encoded = entry.to_bytes();
        bytes.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&encoded);
    }
    bytes
}

fn decode_journal(bytes: &[u8]) -> Result<Vec<UtxoEntry>, StateError> {
    fn take_u32(bytes: &[u8], at: usize) -> Result<u32, StateError> {
        let slice = bytes
            .get(at..at + 4)
            .ok_or(StateError::Corrupt("spend journal failed to decode"))?;
        let mut quad = [0u8; 4];
        quad.copy_from_slice(slice);
        Ok(u32::from_le_bytes(quad))
    }

    let count = take_u32(bytes, 0)? as usize;
    let mut entries = Vec::with_capacity(count);
    let mut cursor = 4usize;
    for _ in 0..count {
        let len = take_u32(bytes, cursor)? as usize;
        cursor += 4;
        let slice = bytes
            .get(cursor..cursor + len)
            .ok_or(StateError::Corrupt("spend journal failed to decode"))?;
        entries.push(UtxoEntry::from_bytes(slice)?);
        cursor += len;
    }
    Ok(entries)
}

/// The persistent UTXO set.
pub struct UtxoEngine {
    utxo: sled::Tree,
    journal: sled::Tree,
}

impl UtxoEngine {
    pub fn new(store: &Store) -> Result<UtxoEngine, StateError> {
        Ok(UtxoEngine {
            utxo: store.open_tree(b"utxo")?,
            journal: store.open_tree(b"spent_journal")?,
        })
    }

    pub fn add(&self, entry: &UtxoEntry) -> Result<(), StateError> {
        self.utxo
            .insert(&entry.outpoint().to_key(), entry.to_bytes())?;
        Ok(())
    }

    pub fn remove(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StateError> {
        match self.utxo.remove(&outpoint.to_key())? {
            Some(bytes) => Ok(Some(UtxoEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StateError> {
        match self.utxo.get(&outpoint.to_key())? {
            Some(bytes) => Ok(Some(UtxoEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan for every unspent output locked by `pk_script`.
    pub fn get_by_address(&self, pk_script: &Script) -> Result<Vec<UtxoEntry>, StateError> {
        let mut entries = Vec::new();
        for item in self.utxo.iter() {
            let (_, value) = item?;
            let entry = UtxoEntry::from_bytes(&value)?;
            if &entry.pk_script == pk_script {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Σ value over `get_by_address`.
    pub fn balance(&self, pk_script: &Script) -> Result<i64, StateError> {
        Ok(self
            .get_by_address(pk_script)?
            .iter()
            .map(|entry| entry.value)
            .sum())
    }

    /// Whether every transparent input of `tx` currently resolves.
    pub fn all_inputs_resolve(&self, tx: &Transaction) -> Result<bool, StateError> {
        for input in tx.inputs.iter() {
            if input.is_coinbase() {
                continue;
            }
            if self.get(&input.previous_outpoint)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Connect `block`: consume every non-coinbase input's outpoint, insert
    /// every output, and journal the consumed entries. One transaction;
    /// partial application is not observable.
    pub fn apply_block(&self, block: &Block, height: Height) -> Result<(), StateError> {
        let block_hash = block.hash();
        (&self.utxo, &self.journal)
            .transaction(|(utxo, journal)| {
                let mut spent = Vec::new();
                for tx in block.transactions.iter() {
                    for input in tx.inputs.iter() {
                        if input.is_coinbase() {
                            continue;
                        }
                        let key = input.previous_outpoint.to_key();
                        let removed = utxo.remove(&key[..])?.ok_or_else(|| {
                            ConflictableTransactionError::Abort(StateError::MissingUtxo(
                                input.previous_outpoint,
                            ))
                        })?;
                        let entry = UtxoEntry::from_bytes(&removed)
                            .map_err(ConflictableTransactionError::Abort)?;
                        spent.push(entry);
                    }
                    let tx_hash = tx.hash();
                    for (index, output) in tx.outputs.iter().enumerate() {
                        let entry = UtxoEntry {
                            tx_hash,
                            index: index as u32,
                            value: output.value,
                            pk_script: output.pk_script.clone(),
                            height: height.0 as i32,
                        };
                        utxo.insert(&entry.outpoint().to_key()[..], entry.to_bytes())?;
                    }
                }
                journal.insert(&block_hash.0[..], encode_journal(&spent))?;
                Ok(())
            })
            .map_err(StateError::from)?;
        Ok(())
    }

    /// Disconnect `block`: drop the outputs it created and restore the
    /// journaled entries it consumed.
    pub fn rollback_block(&self, block: &Block) -> Result<(), StateError> {
        let block_hash = block.hash();
        let journal_bytes = self
            .journal
            .get(&block_hash.0)?
            .ok_or(StateError::MissingJournal(block_hash))?;
        let restored = decode_journal(&journal_bytes)?;

        (&self.utxo, &self.journal)
            .transaction(|(utxo, journal)| {
                for tx in block.transactions.iter() {
                    let tx_hash = tx.hash();
                    for index in 0..tx.outputs.len() {
                        let outpoint = OutPoint {
                            hash: tx_hash,
                            index: index as u32,
                        };
                        utxo.remove(&outpoint.to_key()[..])?;
                    }
                }
                for entry in restored.iter() {
                    utxo.insert(&entry.outpoint().to_key()[..], entry.to_bytes())?;
                }
                journal.remove(&block_hash.0[..])?;
                Ok::<(), ConflictableTransactionError<StateError>>(())
            })
            .map_err(StateError::from)?;
        Ok(())
    }

    /// A bitwise snapshot of the whole UTXO set, for state-equality
    /// assertions in tests and reorg audits.
    pub fn snapshot(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
        let mut entries = Vec::new();
        for item in self.utxo.iter() {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }
}
