//! The mempool: a bounded admission buffer of unconfirmed transactions with
//! fee-priority selection, an outpoint conflict index, and an orphan
//! quarantine.
//!
//! All methods take `&self`; the pool carries its own lock and is shared by
//! `Arc` between the chain and the peer tasks.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

use umbra_chain::block::Height;
use umbra_chain::transaction::{self, Transaction};
use umbra_chain::transparent::OutPoint;
use umbra_state::UtxoEngine;

use crate::error::MempoolError;

/// The pool admission ceiling.
pub const MAX_POOL_SIZE: usize = 10_000;
/// The orphan quarantine ceiling.
pub const MAX_ORPHANS: usize = 100;
/// How long an orphan may wait for its parents.
pub const ORPHAN_EXPIRY: Duration = Duration::from_secs(20 * 60);

/// A pooled transaction and its admission metadata.
#[derive(Clone, Debug)]
pub struct TxDesc {
    pub tx: std::sync::Arc<Transaction>,
    pub added: Instant,
    pub height: Height,
    pub fee: i64,
    pub fee_per_kb: i64,
    seq: u64,
}

struct OrphanDesc {
    tx: std::sync::Arc<Transaction>,
    added: Instant,
}

#[derive(Default)]
struct Inner {
    pool: HashMap<transaction::Hash, TxDesc>,
    by_outpoint: HashMap<OutPoint, transaction::Hash>,
    orphans: HashMap<transaction::Hash, OrphanDesc>,
    seq: u64,
}

/// The shared transaction pool.
pub struct Mempool {
    inner: RwLock<Inner>,
    max_size: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool::new()
    }
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool::with_capacity(MAX_POOL_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Mempool {
        Mempool {
            inner: RwLock::new(Inner::default()),
            max_size,
        }
    }

    /// Fee per kilobyte from an absolute fee and the canonical size.
    pub fn fee_per_kb(fee: i64, size_bytes: usize) -> i64 {
        if size_bytes == 0 {
            return 0;
        }
        fee.saturating_mul(1000) / size_bytes as i64
    }

    /// Admit a transaction observed at `height` paying `fee`.
    ///
    /// Indexes every input outpoint; at most one pooled transaction may
    /// spend any outpoint, so conflicting admissions are rejected.
    pub fn add(
        &self,
        tx: std::sync::Arc<Transaction>,
        height: Height,
        fee: i64,
    ) -> Result<(), MempoolError> {
        let mut inner = self.inner.write().expect("mempool lock poisoned");
        if inner.pool.len() >= self.max_size {
            return Err(MempoolError::PoolFull);
        }
        let hash = tx.hash();
        if inner.pool.contains_key(&hash) {
            return Err(MempoolError::Duplicate);
        }
        for input in tx.inputs.iter() {
            if inner.by_outpoint.contains_key(&input.previous_outpoint) {
                return Err(MempoolError::OutpointConflict);
            }
        }

        for input in tx.inputs.iter() {
            inner.by_outpoint.insert(input.previous_outpoint, hash);
        }
        let fee_per_kb = Mempool::fee_per_kb(fee, tx.serialized_size());
        let seq = inner.seq;
        inner.seq += 1;
        inner.pool.insert(
            hash,
            TxDesc {
                tx,
                added: Instant::now(),
                height,
                fee,
                fee_per_kb,
                seq,
            },
        );
        metrics::gauge!("mempool.size").set(inner.pool.len() as f64);
        Ok(())
    }

    /// Drop a transaction and tear down its outpoint index entries.
    pub fn remove(&self, hash: &transaction::Hash) -> Option<std::sync::Arc<Transaction>> {
        let mut inner = self.inner.write().expect("mempool lock poisoned");
        let desc = inner.pool.remove(hash)?;
        for input in desc.tx.inputs.iter() {
            inner.by_outpoint.remove(&input.previous_outpoint);
        }
        metrics::gauge!("mempool.size").set(inner.pool.len() as f64);
        Some(desc.tx)
    }

    pub fn get(&self, hash: &transaction::Hash) -> Option<std::sync::Arc<Transaction>> {
        let inner = self.inner.read().expect("mempool lock poisoned");
        inner.pool.get(hash).map(|desc| desc.tx.clone())
    }

    pub fn contains(&self, hash: &transaction::Hash) -> bool {
        let inner = self.inner.read().expect("mempool lock poisoned");
        inner.pool.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("mempool lock poisoned");
        inner.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True iff some pooled transaction spends `outpoint`.
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        let inner = self.inner.read().expect("mempool lock poisoned");
        inner.by_outpoint.contains_key(outpoint)
    }

    /// Up to `limit` transactions, fee-per-KB descending, admission order
    /// breaking ties.
    pub fn get_by_priority(&self, limit: usize) -> Vec<std::sync::Arc<Transaction>> {
        let inner = self.inner.read().expect("mempool lock poisoned");
        let mut descs: Vec<&TxDesc> = inner.pool.values().collect();
        descs.sort_by(|a, b| {
            b.fee_per_kb
                .cmp(&a.fee_per_kb)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        descs
            .into_iter()
            .take(limit)
            .map(|desc| desc.tx.clone())
            .collect()
    }

    /// All transaction fingerprints currently pooled.
    pub fn fingerprints(&self) -> Vec<transaction::Hash> {
        let inner = self.inner.read().expect("mempool lock poisoned");
        inner.pool.keys().copied().collect()
    }

    /// Evict every pooled transaction that spends an outpoint also spent by
    /// `tx`. Returns the evicted fingerprints.
    pub fn remove_double_spends(&self, tx: &Transaction) -> Vec<transaction::Hash> {
        let conflicting: Vec<transaction::Hash> = {
            let inner = self.inner.read().expect("mempool lock poisoned");
            tx.inputs
                .iter()
                .filter_map(|input| inner.by_outpoint.get(&input.previous_outpoint).copied())
                .collect()
        };
        let mut evicted = Vec::new();
        for hash in conflicting {
            if self.remove(&hash).is_some() {
                debug!(?hash, "evicted double-spend from mempool");
                evicted.push(hash);
            }
        }
        evicted
    }

    /// Quarantine a transaction whose inputs do not all resolve yet. On
    /// overflow the oldest orphan is evicted.
    pub fn add_orphan(&self, tx: std::sync::Arc<Transaction>) {
        let mut inner = self.inner.write().expect("mempool lock poisoned");
        if inner.orphans.len() >= MAX_ORPHANS {
            if let Some(oldest) = inner
                .orphans
                .iter()
                .min_by_key(|(_, desc)| desc.added)
                .map(|(hash, _)| *hash)
            {
                inner.orphans.remove(&oldest);
            }
        }
        inner.orphans.insert(
            tx.hash(),
            OrphanDesc {
                tx,
                added: Instant::now(),
            },
        );
    }

    pub fn orphan_count(&self) -> usize {
        let inner = self.inner.read().expect("mempool lock poisoned");
        inner.orphans.len()
    }

    /// Drop orphans older than [`ORPHAN_EXPIRY`].
    pub fn expire_orphans(&self) {
        let mut inner = self.inner.write().expect("mempool lock poisoned");
        let cutoff = Instant::now();
        inner
            .orphans
            .retain(|_, desc| cutoff.duration_since(desc.added) < ORPHAN_EXPIRY);
    }

    /// Promote orphans whose every input now resolves against `utxo`.
    /// Returns the promoted transactions so the caller can validate and
    /// announce them.
    pub fn process_orphans(&self, utxo: &UtxoEngine) -> Vec<std::sync::Arc<Transaction>> {
        let candidates: Vec<(transaction::Hash, std::sync::Arc<Transaction>)> = {
            let inner = self.inner.read().expect("mempool lock poisoned");
            inner
                .orphans
                .iter()
                .map(|(hash, desc)| (*hash, desc.tx.clone()))
                .collect()
        };

        let mut promoted = Vec::new();
        for (hash, tx) in candidates {
            if utxo.all_inputs_resolve(&tx).unwrap_or(false) {
                let mut inner = self.inner.write().expect("mempool lock poisoned");
                inner.orphans.remove(&hash);
                promoted.push(tx);
            }
        }
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use umbra_chain::transaction::{Memo, TxType};
    use umbra_chain::transparent::{Input, Output, Script};

    fn tx_spending(tag: u8, index: u32) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            TxType::Transparent,
            vec![Input {
                previous_outpoint: OutPoint {
                    hash: transaction::Hash([tag; 32]),
                    index,
                },
                signature_script: Script(vec![tag]),
                sequence: 0,
            }],
            vec![Output {
                value: 1,
                pk_script: Script(vec![tag]),
            }],
            0,
            Memo::empty(),
        ))
    }

    #[test]
    fn outpoint_index_has_at_most_one_spender() {
        let pool = Mempool::new();
        let first = tx_spending(1, 0);
        // Same outpoint, different outputs => different fingerprint.
        let second = Arc::new(Transaction::new(
            1,
            TxType::Transparent,
            first.inputs.clone(),
            vec![Output {
                value: 2,
                pk_script: Script(vec![0x99]),
            }],
            0,
            Memo::empty(),
        ));
        pool.add(first.clone(), Height(1), 100).unwrap();
        assert_eq!(
            pool.add(second, Height(1), 200),
            Err(MempoolError::OutpointConflict)
        );
        assert!(pool.is_spent(&first.inputs[0].previous_outpoint));
    }

    #[test]
    fn duplicates_and_overflow_are_rejected() {
        let pool = Mempool::with_capacity(2);
        let a = tx_spending(1, 0);
        pool.add(a.clone(), Height(1), 10).unwrap();
        assert_eq!(pool.add(a, Height(1), 10), Err(MempoolError::Duplicate));

        pool.add(tx_spending(2, 0), Height(1), 10).unwrap();
        assert_eq!(
            pool.add(tx_spending(3, 0), Height(1), 10),
            Err(MempoolError::PoolFull)
        );
    }

    #[test]
    fn priority_orders_by_fee_rate_then_insertion() {
        let pool = Mempool::new();
        let low = tx_spending(1, 0);
        let high = tx_spending(2, 0);
        let mid_first = tx_spending(3, 0);
        let mid_second = tx_spending(4, 0);

        // Identical sizes, so fees order the rates.
        pool.add(low.clone(), Height(1), 100).unwrap();
        pool.add(mid_first.clone(), Height(1), 500).unwrap();
        pool.add(high.clone(), Height(1), 1000).unwrap();
        pool.add(mid_second.clone(), Height(1), 500).unwrap();

        let selected = pool.get_by_priority(10);
        let hashes: Vec<_> = selected.iter().map(|tx| tx.hash()).collect();
        assert_eq!(
            hashes,
            vec![high.hash(), mid_first.hash(), mid_second.hash(), low.hash()]
        );

        assert_eq!(pool.get_by_priority(2).len(), 2);
    }

    #[test]
    fn removal_tears_down_the_outpoint_index() {
        let pool = Mempool::new();
        let tx = tx_spending(1, 0);
        pool.add(tx.clone(), Height(1), 10).unwrap();
        pool.remove(&tx.hash());
        assert!(!pool.is_spent(&tx.inputs[0].previous_outpoint));
        assert!(pool.is_empty());
    }

    #[test]
    fn double_spends_are_evicted() {
        let pool = Mempool::new();
        let pooled = tx_spending(1, 0);
        pool.add(pooled.clone(), Height(1), 10).unwrap();

        let confirmed = tx_spending(1, 0);
        let evicted = pool.remove_double_spends(&confirmed);
        assert_eq!(evicted, vec![pooled.hash()]);
        assert!(pool.is_empty());
    }

    #[test]
    fn orphan_overflow_evicts_the_oldest() {
        let pool = Mempool::new();
        for tag in 0..=MAX_ORPHANS as u8 {
            pool.add_orphan(tx_spending(tag, 7));
        }
        assert_eq!(pool.orphan_count(), MAX_ORPHANS);
    }

    #[test]
    fn fee_rate_math() {
        assert_eq!(Mempool::fee_per_kb(1000, 250), 4000);
        assert_eq!(Mempool::fee_per_kb(0, 250), 0);
        assert_eq!(Mempool::fee_per_kb(10, 0), 0);
    }
}
