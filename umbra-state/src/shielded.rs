//! The shielded pool: live note commitments, spent nullifiers, and the
//! incremental note commitment tree whose roots anchor future spends.
//!
//! Trees:
//!   - `nullifiers`:  nullifier bytes → spending tx hash
//!   - `commitments`: commitment bytes → big-endian leaf index
//!   - `leaves`:      big-endian leaf index → commitment bytes
//!   - `anchors`:     root bytes → big-endian leaf count at that root
//!   - `shielded_meta`: the running turnover counter
//!
//! Inserting a duplicate nullifier fails with the distinguished
//! [`StateError::InvalidNullifier`] kind: that is the shielded double-spend
//! signal.

mod tree;

pub use tree::{NoteCommitmentTree, TREE_DEPTH};

use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use tracing::debug;

use umbra_chain::shielded::{Commitment, Nullifier, OutputDescription, SpendDescription};
use umbra_chain::transaction::Transaction;

use crate::{StateError, Store};

/// The permitted window for a transaction's `value_balance`, in satoshis.
pub const VALUE_BALANCE_LIMIT: i64 = 100_000_000;

/// How many recent anchors stay valid for new spends.
const ANCHOR_HISTORY: u64 = 100;

const TURNOVER_KEY: &[u8] = b"turnover";

/// The pluggable shielded proof verifier.
///
/// The chain treats proof objects as opaque; a production deployment plugs
/// in a real zero-knowledge verifier here. [`StructuralVerifier`] is the
/// built-in default and performs structural checks only.
pub trait ProofVerifier: Send + Sync {
    fn verify_spend(&self, spend: &SpendDescription) -> bool;
    fn verify_output(&self, output: &OutputDescription) -> bool;
    /// Check the signature binding the value commitments to the
    /// transaction's `value_balance`.
    fn verify_binding(&self, tx: &Transaction) -> bool;
}

/// Structural proof verification: field sizes are type-enforced, so this
/// checks that proof and signature material is present (non-zero).
pub struct StructuralVerifier;

impl ProofVerifier for StructuralVerifier {
    fn verify_spend(&self, spend: &SpendDescription) -> bool {
        spend.proof.iter().any(|&byte| byte != 0)
            && spend.spend_auth_sig.iter().any(|&byte| byte != 0)
    }

    fn verify_output(&self, output: &OutputDescription) -> bool {
        output.proof.iter().any(|&byte| byte != 0)
    }

    fn verify_binding(&self, tx: &Transaction) -> bool {
        !tx.has_shielded_components() || tx.binding_sig.iter().any(|&byte| byte != 0)
    }
}

/// The persistent shielded pool.
pub struct ShieldedPool {
    nullifiers: sled::Tree,
    commitments: sled::Tree,
    leaves: sled::Tree,
    anchors: sled::Tree,
    meta: sled::Tree,
    tree: NoteCommitmentTree,
    verifier: Box<dyn ProofVerifier>,
}

impl ShieldedPool {
    pub fn new(store: &Store, verifier: Box<dyn ProofVerifier>) -> Result<ShieldedPool, StateError> {
        let nullifiers = store.open_tree(b"nullifiers")?;
        let commitments = store.open_tree(b"commitments")?;
        let leaves = store.open_tree(b"leaves")?;
        let anchors = store.open_tree(b"anchors")?;
        let meta = store.open_tree(b"shielded_meta")?;

        // Rebuild the in-memory frontier from the persisted leaves.
        let mut tree = NoteCommitmentTree::new();
        for item in leaves.iter() {
            let (_, commitment) = item?;
            tree.append(decode_commitment(&commitment)?);
        }
        debug!(leaves = tree.leaf_count(), "rebuilt note commitment tree");

        let mut pool = ShieldedPool {
            nullifiers,
            commitments,
            leaves,
            anchors,
            meta,
            tree,
            verifier,
        };
        // The empty-tree root is always an acceptable anchor.
        pool.record_anchor()?;
        Ok(pool)
    }

    /// The current root of the note commitment tree.
    pub fn root(&self) -> Commitment {
        Commitment(self.tree.root())
    }

    pub fn commitment_count(&self) -> u64 {
        self.tree.leaf_count()
    }

    /// Cumulative absolute shielded value moved, monotonic over committed
    /// transactions.
    pub fn total_turnover(&self) -> Result<u64, StateError> {
        Ok(match self.meta.get(TURNOVER_KEY)? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 0,
        })
    }

    pub fn contains_nullifier(&self, nullifier: &Nullifier) -> Result<bool, StateError> {
        Ok(self.nullifiers.contains_key(nullifier.0)?)
    }

    pub fn contains_commitment(&self, commitment: &Commitment) -> Result<bool, StateError> {
        Ok(self.commitments.contains_key(commitment.0)?)
    }

    fn anchor_is_known(&self, anchor: &[u8; 32]) -> Result<bool, StateError> {
        Ok(self.anchors.contains_key(anchor)?)
    }

    /// Validate the shielded side of `tx` against the current pool state.
    ///
    /// Checks, in order: nullifier freshness (set-wide and within the
    /// transaction), anchor recency, proof structure, and the value-balance
    /// window. Read-only.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), StateError> {
        let mut seen = std::collections::HashSet::new();
        for spend in tx.shielded_spends.iter() {
            if !seen.insert(spend.nullifier) || self.contains_nullifier(&spend.nullifier)? {
                return Err(StateError::InvalidNullifier);
            }
            if !self.anchor_is_known(&spend.anchor)? {
                return Err(StateError::UnknownAnchor);
            }
            if !self.verifier.verify_spend(spend) {
                return Err(StateError::InvalidShieldedProof);
            }
        }
        for output in tx.shielded_outputs.iter() {
            if self.contains_commitment(&output.cmu)? {
                return Err(StateError::DuplicateCommitment);
            }
            if !self.verifier.verify_output(output) {
                return Err(StateError::InvalidShieldedProof);
            }
        }
        if tx.value_balance.abs() > VALUE_BALANCE_LIMIT {
            return Err(StateError::InvalidValueBalance(tx.value_balance));
        }
        if !self.verifier.verify_binding(tx) {
            return Err(StateError::InvalidShieldedProof);
        }
        Ok(())
    }

    /// Apply the shielded side of a validated `tx`: insert its nullifiers
    /// and commitments atomically, then extend the tree and anchor history.
    ///
    /// On any failure nothing of the transaction is visible.
    pub fn process_transaction(&mut self, tx: &Transaction) -> Result<(), StateError> {
        self.validate_transaction(tx)?;
        if tx.shielded_spends.is_empty() && tx.shielded_outputs.is_empty() {
            return Ok(());
        }

        let tx_hash = tx.hash();
        let first_leaf = self.tree.leaf_count();
        (&self.nullifiers, &self.commitments, &self.leaves)
            .transaction(|(nullifiers, commitments, leaves)| {
                for spend in tx.shielded_spends.iter() {
                    if nullifiers
                        .insert(&spend.nullifier.0[..], &tx_hash.0[..])?
                        .is_some()
                    {
                        return Err(ConflictableTransactionError::Abort(
                            StateError::InvalidNullifier,
                        ));
                    }
                }
                let mut leaf = first_leaf;
                for output in tx.shielded_outputs.iter() {
                    if commitments
                        .insert(&output.cmu.0[..], &leaf.to_be_bytes()[..])?
                        .is_some()
                    {
                        return Err(ConflictableTransactionError::Abort(
                            StateError::DuplicateCommitment,
                        ));
                    }
                    leaves.insert(&leaf.to_be_bytes()[..], &output.cmu.0[..])?;
                    leaf += 1;
                }
                Ok(())
            })
            .map_err(StateError::from)?;

        for output in tx.shielded_outputs.iter() {
            self.tree.append(output.cmu);
        }
        self.record_anchor()?;
        self.bump_turnover(tx.value_balance.unsigned_abs())?;
        metrics::counter!("state.shielded.nullifiers").increment(tx.shielded_spends.len() as u64);
        Ok(())
    }

    /// Undo the shielded side of `tx`. The transaction must be the most
    /// recently processed one whose outputs occupy the tail of the tree.
    pub fn rollback_transaction(&mut self, tx: &Transaction) -> Result<(), StateError> {
        (&self.nullifiers, &self.commitments, &self.leaves)
            .transaction(|(nullifiers, commitments, leaves)| {
                for spend in tx.shielded_spends.iter() {
                    nullifiers.remove(&spend.nullifier.0[..])?;
                }
                for output in tx.shielded_outputs.iter() {
                    if let Some(leaf_bytes) = commitments.remove(&output.cmu.0[..])? {
                        leaves.remove(leaf_bytes)?;
                    }
                }
                Ok::<(), ConflictableTransactionError<StateError>>(())
            })
            .map_err(StateError::from)?;

        if !tx.shielded_outputs.is_empty() {
            self.rebuild_tree()?;
        }
        Ok(())
    }

    /// Apply the shielded sides of every transaction in a block, in order.
    pub fn process_block_transactions<'a, I>(&mut self, txs: I) -> Result<(), StateError>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        for tx in txs {
            self.process_transaction(tx)?;
        }
        Ok(())
    }

    fn rebuild_tree(&mut self) -> Result<(), StateError> {
        let mut tree = NoteCommitmentTree::new();
        for item in self.leaves.iter() {
            let (_, commitment) = item?;
            tree.append(decode_commitment(&commitment)?);
        }
        self.tree = tree;
        self.record_anchor()
    }

    fn record_anchor(&mut self) -> Result<(), StateError> {
        let count = self.tree.leaf_count();
        self.anchors
            .insert(self.tree.root(), &count.to_be_bytes()[..])?;
        // Expire anchors that have fallen out of the recent window.
        let floor = count.saturating_sub(ANCHOR_HISTORY);
        let mut expired = Vec::new();
        for item in self.anchors.iter() {
            let (root, seq) = item?;
            if decode_u64(&seq)? < floor {
                expired.push(root);
            }
        }
        for root in expired {
            self.anchors.remove(root)?;
        }
        Ok(())
    }

    fn bump_turnover(&self, delta: u64) -> Result<(), StateError> {
        let total = self.total_turnover()?.saturating_add(delta);
        self.meta.insert(TURNOVER_KEY, &total.to_be_bytes()[..])?;
        Ok(())
    }
}

fn decode_commitment(bytes: &[u8]) -> Result<Commitment, StateError> {
    if bytes.len() != 32 {
        return Err(StateError::Corrupt("commitment entry must be 32 bytes"));
    }
    let mut buf = [0u8; 32];
    buf.copy_from_slice(bytes);
    Ok(Commitment(buf))
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StateError> {
    if bytes.len() != 8 {
        return Err(StateError::Corrupt("counter entry must be 8 bytes"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use umbra_chain::shielded::{
        ENC_CIPHERTEXT_BYTES, MEMO_BYTES, OUT_CIPHERTEXT_BYTES, PROOF_BYTES,
    };
    use umbra_chain::transaction::{Memo, TxType};

    fn pool() -> ShieldedPool {
        let store = Store::new(&Config::ephemeral()).unwrap();
        ShieldedPool::new(&store, Box::new(StructuralVerifier)).unwrap()
    }

    fn spend(nullifier: u8, anchor: [u8; 32]) -> SpendDescription {
        SpendDescription {
            cv: [1; 32],
            anchor,
            nullifier: Nullifier([nullifier; 32]),
            rk: [2; 32],
            proof: [3; PROOF_BYTES],
            spend_auth_sig: [4; 64],
            token_id: [0; 32],
            token_amount: 0,
        }
    }

    fn output(cmu: u8) -> OutputDescription {
        OutputDescription {
            cv: [1; 32],
            cmu: Commitment([cmu; 32]),
            ephemeral_key: [2; 32],
            enc_ciphertext: [3; ENC_CIPHERTEXT_BYTES],
            out_ciphertext: [4; OUT_CIPHERTEXT_BYTES],
            proof: [5; PROOF_BYTES],
            memo: [0; MEMO_BYTES],
            token_id: [0; 32],
            token_amount: 0,
        }
    }

    fn shielded_tx(
        pool: &ShieldedPool,
        nullifiers: &[u8],
        cmus: &[u8],
        value_balance: i64,
    ) -> umbra_chain::transaction::Transaction {
        let anchor = pool.root().0;
        let mut tx = umbra_chain::transaction::Transaction::new(
            1,
            TxType::Shielded,
            vec![],
            vec![],
            0,
            Memo::empty(),
        );
        tx.value_balance = value_balance;
        tx.shielded_spends = nullifiers.iter().map(|&n| spend(n, anchor)).collect();
        tx.shielded_outputs = cmus.iter().map(|&c| output(c)).collect();
        tx.binding_sig = [9; 64];
        tx
    }

    #[test]
    fn nullifier_double_spend_is_rejected_without_side_effects() {
        let mut pool = pool();
        let first = shielded_tx(&pool, &[1], &[10], 0);
        pool.process_transaction(&first).unwrap();

        // A second transaction reusing the same nullifier with a different
        // commitment.
        let second = shielded_tx(&pool, &[1], &[11], 0);
        let err = pool.process_transaction(&second).unwrap_err();
        assert!(err.is_invalid_nullifier());

        // Nothing of the second transaction is visible.
        assert!(!pool.contains_commitment(&Commitment([11; 32])).unwrap());
        assert_eq!(pool.commitment_count(), 1);
    }

    #[test]
    fn duplicate_nullifier_within_one_transaction_is_rejected() {
        let mut pool = pool();
        let tx = shielded_tx(&pool, &[1, 1], &[], 0);
        assert!(pool
            .process_transaction(&tx)
            .unwrap_err()
            .is_invalid_nullifier());
    }

    #[test]
    fn value_balance_window_is_enforced() {
        let mut pool = pool();
        let tx = shielded_tx(&pool, &[], &[1], VALUE_BALANCE_LIMIT + 1);
        assert!(matches!(
            pool.process_transaction(&tx),
            Err(StateError::InvalidValueBalance(_))
        ));
        let tx = shielded_tx(&pool, &[], &[1], VALUE_BALANCE_LIMIT);
        pool.process_transaction(&tx).unwrap();
    }

    #[test]
    fn unknown_anchor_is_rejected() {
        let mut pool = pool();
        let mut tx = shielded_tx(&pool, &[5], &[], 0);
        tx.shielded_spends[0].anchor = [0xcc; 32];
        assert!(matches!(
            pool.process_transaction(&tx),
            Err(StateError::UnknownAnchor)
        ));
    }

    #[test]
    fn rollback_restores_root_and_sets() {
        let mut pool = pool();
        let empty_root = pool.root();

        let tx = shielded_tx(&pool, &[1], &[10, 11], 7);
        pool.process_transaction(&tx).unwrap();
        assert_ne!(pool.root(), empty_root);
        assert!(pool.contains_nullifier(&Nullifier([1; 32])).unwrap());

        pool.rollback_transaction(&tx).unwrap();
        assert_eq!(pool.root(), empty_root);
        assert!(!pool.contains_nullifier(&Nullifier([1; 32])).unwrap());
        assert!(!pool.contains_commitment(&Commitment([10; 32])).unwrap());
        assert_eq!(pool.commitment_count(), 0);
    }

    #[test]
    fn spends_may_reference_recent_anchors() {
        let mut pool = pool();
        let tx = shielded_tx(&pool, &[], &[1], 0);
        let old_anchor = pool.root().0;
        pool.process_transaction(&tx).unwrap();

        // The pre-insert root remains acceptable.
        let mut spend_tx = shielded_tx(&pool, &[7], &[], 0);
        spend_tx.shielded_spends[0].anchor = old_anchor;
        pool.process_transaction(&spend_tx).unwrap();
    }

    #[test]
    fn turnover_is_monotonic() {
        let mut pool = pool();
        let tx = shielded_tx(&pool, &[], &[1], -50);
        pool.process_transaction(&tx).unwrap();
        let after_one = pool.total_turnover().unwrap();
        assert_eq!(after_one, 50);

        let tx = shielded_tx(&pool, &[], &[2], 20);
        pool.process_transaction(&tx).unwrap();
        assert!(pool.total_turnover().unwrap() > after_one);
    }
}
