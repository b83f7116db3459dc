//! The chain state machine.
//!
//! `Chain` owns the persistent store, the UTXO engine, the shielded pool,
//! the token ledger, the mempool, and the fee estimator, and is the only
//! writer to any of them. Callers serialize access behind one exclusive
//! lock; everything here takes `&mut self` for writes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use umbra_chain::block::{self, Block, Height};
use umbra_chain::parameters::{genesis_block, NetworkParameters};
use umbra_chain::tokens::TokenOperation;
use umbra_chain::transaction::Transaction;
use umbra_chain::work::difficulty::Work;
use umbra_state::{Config, ProofVerifier, ShieldedPool, Store, UtxoEngine};

use crate::check;
use crate::difficulty::{self, is_retarget_height};
use crate::error::{BlockError, TransactionError};
use crate::fee_estimator::{BlockFeeStats, FeeEstimator};
use crate::mempool::Mempool;
use crate::pow::PowEngine;
use crate::tokens::TokenLedger;
use crate::transaction::{operator_address, validate_token_operation, validate_transparent};

/// What `process_block` did with an accepted block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcessOutcome {
    /// The block extended the best chain and is the new tip.
    Connected,
    /// The block joined a side chain that is not (yet) heavier; it is
    /// stored but the tip is unchanged.
    SideChainStored,
    /// The block completed a heavier side chain and the best chain switched
    /// to it.
    Reorganized,
}

/// The chain state machine. See the module docs for the ownership story.
pub struct Chain {
    params: NetworkParameters,
    store: Store,
    utxo: UtxoEngine,
    shielded: ShieldedPool,
    tokens: Box<dyn TokenLedger>,
    mempool: Arc<Mempool>,
    estimator: Arc<FeeEstimator>,
    best_hash: block::Hash,
    height: Height,
}

impl Chain {
    /// Open (or create) the chain state. An empty store is seeded with the
    /// network's genesis block, which is exempt from validation.
    pub fn init(
        params: NetworkParameters,
        config: &Config,
        verifier: Box<dyn ProofVerifier>,
        tokens: Box<dyn TokenLedger>,
    ) -> Result<Chain, BlockError> {
        let store = Store::new(config)?;
        let utxo = UtxoEngine::new(&store)?;
        let shielded = ShieldedPool::new(&store, verifier)?;

        let (height, best_hash) = match store.tip()? {
            Some(tip) => tip,
            None => {
                let genesis = genesis_block(params.network);
                let hash = store.insert_block(&genesis)?;
                utxo.apply_block(&genesis, Height(0))?;
                store.connect_to_main_chain(hash, Height(0))?;
                store.flush()?;
                info!(%hash, "committed genesis block");
                (Height(0), hash)
            }
        };

        Ok(Chain {
            params,
            store,
            utxo,
            shielded,
            tokens,
            mempool: Arc::new(Mempool::new()),
            estimator: Arc::new(FeeEstimator::new()),
            best_hash,
            height,
        })
    }

    pub fn params(&self) -> &NetworkParameters {
        &self.params
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn best_hash(&self) -> block::Hash {
        self.best_hash
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn utxo(&self) -> &UtxoEngine {
        &self.utxo
    }

    pub fn shielded(&self) -> &ShieldedPool {
        &self.shielded
    }

    /// The shared mempool handle; the network layer clones this.
    pub fn mempool(&self) -> Arc<Mempool> {
        self.mempool.clone()
    }

    /// The shared fee estimator handle.
    pub fn fee_estimator(&self) -> Arc<FeeEstimator> {
        self.estimator.clone()
    }

    pub fn contains_block(&self, hash: &block::Hash) -> Result<bool, BlockError> {
        Ok(self.store.contains_block(hash)?)
    }

    pub fn block(&self, hash: &block::Hash) -> Result<Option<Block>, BlockError> {
        Ok(self.store.block(hash)?)
    }

    pub fn block_locator(&self) -> Result<Vec<block::Hash>, BlockError> {
        Ok(self.store.block_locator()?)
    }

    /// Accept or reject a candidate block.
    ///
    /// A child of the current tip is validated and connected; a block whose
    /// parent is stored joins a side chain and may trigger a
    /// reorganization; a block with an unknown parent is an orphan and is
    /// not stored.
    pub fn process_block(
        &mut self,
        block: Arc<Block>,
        pow: &dyn PowEngine,
    ) -> Result<ProcessOutcome, BlockError> {
        let hash = block.hash();
        if self.store.contains_block(&hash)? {
            return Err(BlockError::DuplicateBlock(hash));
        }

        if block.header.previous_block_hash == self.best_hash {
            let next_height = self.height.next();
            self.connect_block(&block, next_height, Some(pow))?;
            info!(%hash, height = next_height.0, "connected block");
            Ok(ProcessOutcome::Connected)
        } else if self
            .store
            .contains_block(&block.header.previous_block_hash)?
        {
            self.store.insert_block(&block)?;
            self.maybe_reorganize(&block, pow)
        } else {
            Err(BlockError::OrphanBlock(hash))
        }
    }

    /// Validate everything about `block` at `height` that does not mutate
    /// state. `pow` of `None` skips the proof checks (used when replaying
    /// blocks that were already valid on this chain).
    fn validate_block(
        &self,
        block: &Block,
        height: Height,
        pow: Option<&dyn PowEngine>,
    ) -> Result<Vec<i64>, BlockError> {
        check::header_is_sane(&block.header)?;
        check::time_is_valid_at(&block.header, Utc::now(), &self.params)?;

        if let Some(pow) = pow {
            let required = self.required_difficulty(height, &block.header)?;
            if !difficulty::difficulty_is_acceptable(
                &self.params,
                block.header.difficulty_threshold,
                required,
            ) {
                return Err(BlockError::WrongDifficulty {
                    expected: required,
                    actual: block.header.difficulty_threshold,
                });
            }
            if !pow.verify(&block.header) {
                return Err(BlockError::InvalidProofOfWork);
            }
        }

        if let Some(checkpoint) = self.params.checkpoint(height) {
            if block.hash() != checkpoint {
                return Err(BlockError::CheckpointMismatch(height));
            }
        }

        check::block_is_within_size_limit(block, &self.params)?;
        check::coinbase_is_first(block)?;
        let hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
        check::merkle_root_validity(block, &hashes)?;

        let mut fees = Vec::with_capacity(block.transactions.len());
        for tx in block.transactions.iter().skip(1) {
            let fee = validate_transparent(tx, &self.utxo, height, &self.params)?;
            if tx.has_shielded_components() {
                self.shielded
                    .validate_transaction(tx)
                    .map_err(TransactionError::from)?;
            }
            if tx.tx_type.is_token_operation() {
                validate_token_operation(tx, self.tokens.as_ref())?;
            }
            fees.push(fee);
        }

        let total_fees = fees.iter().sum();
        check::subsidy_is_valid(block, height, &self.params, total_fees)?;

        Ok(fees)
    }

    /// The required compact target for a block at `height` whose parent
    /// header is `candidate`'s parent on this chain.
    fn required_difficulty(
        &self,
        height: Height,
        candidate: &block::Header,
    ) -> Result<umbra_chain::work::difficulty::CompactDifficulty, BlockError> {
        let parent = self
            .store
            .block(&candidate.previous_block_hash)?
            .ok_or(BlockError::OrphanBlock(candidate.previous_block_hash))?;

        let window_start = if is_retarget_height(height, &self.params) {
            let start_height = Height(height.0 - self.params.retarget_interval);
            let start_hash = self
                .store
                .main_chain_hash(start_height)?
                .ok_or(BlockError::ForkChooser("retarget window start not indexed"))?;
            Some(
                self.store
                    .block(&start_hash)?
                    .ok_or(BlockError::ForkChooser("retarget window start missing"))?,
            )
        } else {
            None
        };

        difficulty::next_required_difficulty(
            &self.params,
            height,
            &parent.header,
            window_start.as_ref().map(|b| &b.header),
        )
    }

    /// Validate and apply `block` as the new tip at `height`.
    fn connect_block(
        &mut self,
        block: &Block,
        height: Height,
        pow: Option<&dyn PowEngine>,
    ) -> Result<(), BlockError> {
        let fees = self.validate_block(block, height, pow)?;

        // Apply, unwinding on partial failure so the chain state stays
        // consistent even though three engines are involved.
        self.utxo.apply_block(block, height)?;

        let mut processed_shielded: Vec<&Arc<Transaction>> = Vec::new();
        for tx in block.transactions.iter().skip(1) {
            if let Err(err) = self.shielded.process_transaction(tx) {
                for done in processed_shielded.iter().rev() {
                    let _ = self.shielded.rollback_transaction(done);
                }
                let _ = self.utxo.rollback_block(block);
                return Err(TransactionError::from(err).into());
            }
            processed_shielded.push(tx);
        }

        let mut applied_tokens: Vec<(&Arc<Transaction>, TokenOperation, [u8; 20])> = Vec::new();
        for tx in block.transactions.iter().skip(1) {
            if !tx.tx_type.is_token_operation() {
                continue;
            }
            // Re-derivation cannot fail: validate_block decoded these.
            let op = match TokenOperation::from_memo(&tx.memo) {
                Ok(op) => op,
                Err(_) => continue,
            };
            let operator = match operator_address(tx) {
                Some(operator) => operator,
                None => continue,
            };
            if let Err(err) = self.tokens.apply(&op, &operator, tx) {
                for (done_tx, done_op, done_operator) in applied_tokens.iter().rev() {
                    let _ = self.tokens.rollback(done_op, done_operator, done_tx);
                }
                for done in processed_shielded.iter().rev() {
                    let _ = self.shielded.rollback_transaction(done);
                }
                let _ = self.utxo.rollback_block(block);
                return Err(TransactionError::from(err).into());
            }
            applied_tokens.push((tx, op, operator));
        }

        let hash = self.store.insert_block(block)?;
        self.store.connect_to_main_chain(hash, height)?;
        self.best_hash = hash;
        self.height = height;

        // Confirmed transactions leave the pool, along with anything they
        // conflict with.
        for tx in block.transactions.iter().skip(1) {
            self.mempool.remove(&tx.hash());
            self.mempool.remove_double_spends(tx);
        }

        let stats: Vec<(i64, usize)> = block
            .transactions
            .iter()
            .skip(1)
            .zip(fees.iter())
            .map(|(tx, fee)| (*fee, tx.serialized_size()))
            .collect();
        self.estimator
            .add_block(BlockFeeStats::from_block(height, &stats));

        self.store.flush()?;
        metrics::counter!("chain.blocks.connected").increment(1);
        Ok(())
    }

    /// Disconnect the current tip block, returning its non-coinbase
    /// transactions for mempool resurrection.
    fn disconnect_tip(&mut self, block: &Block) -> Result<(), BlockError> {
        let hash = block.hash();
        debug_assert_eq!(hash, self.best_hash);

        // Tokens unwind first (they were applied last), then shielded, then
        // the UTXO set.
        for tx in block.transactions.iter().skip(1).rev() {
            if tx.tx_type.is_token_operation() {
                if let (Ok(op), Some(operator)) =
                    (TokenOperation::from_memo(&tx.memo), operator_address(tx))
                {
                    let _ = self.tokens.rollback(&op, &operator, tx);
                }
            }
        }
        for tx in block.transactions.iter().skip(1).rev() {
            self.shielded
                .rollback_transaction(tx)
                .map_err(TransactionError::from)?;
        }
        self.utxo.rollback_block(block)?;

        let parent = block.header.previous_block_hash;
        self.store.disconnect_from_main_chain(hash, parent)?;
        self.best_hash = parent;
        self.height = self
            .height
            .previous()
            .ok_or(BlockError::ForkChooser("disconnected below genesis"))?;
        self.estimator.pop_block();
        Ok(())
    }

    /// The fee of a transparent transaction against the current UTXO set,
    /// without signature checks. Used for best-effort resurrection.
    fn observed_fee(&self, tx: &Transaction) -> Option<i64> {
        let mut sum_in: i64 = 0;
        for input in tx.inputs.iter() {
            sum_in = sum_in.checked_add(self.utxo.get(&input.previous_outpoint).ok()??.value)?;
        }
        let sum_out: i64 = tx.outputs.iter().map(|output| output.value).sum();
        sum_in.checked_add(tx.value_balance)?.checked_sub(sum_out)
    }

    /// Walk `from` back through stored blocks until a main-chain ancestor
    /// is found. Returns the fork point and the side blocks oldest-first.
    fn find_fork(
        &self,
        from: &Block,
    ) -> Result<(Height, block::Hash, Vec<Block>), BlockError> {
        let mut side_blocks = vec![from.clone()];
        let mut cursor = from.header.previous_block_hash;
        loop {
            if let Some(height) = self.store.main_chain_height(&cursor)? {
                side_blocks.reverse();
                return Ok((height, cursor, side_blocks));
            }
            let parent = self
                .store
                .block(&cursor)?
                .ok_or(BlockError::ForkChooser("side chain does not meet the main chain"))?;
            cursor = parent.header.previous_block_hash;
            side_blocks.push(parent);
        }
    }

    fn chain_work<'a, I: IntoIterator<Item = &'a Block>>(blocks: I) -> Work {
        blocks
            .into_iter()
            .filter_map(|block| block.header.difficulty_threshold.to_expanded())
            .map(|target| target.to_work())
            .fold(Work::zero(), |acc, work| acc + work)
    }

    /// Evaluate a stored side-chain tip and switch to it when its
    /// cumulative work exceeds the main chain's above the fork point.
    fn maybe_reorganize(
        &mut self,
        new_tip: &Block,
        pow: &dyn PowEngine,
    ) -> Result<ProcessOutcome, BlockError> {
        let (fork_height, fork_hash, side_blocks) = self.find_fork(new_tip)?;

        let mut main_blocks = Vec::new();
        let mut height = self.height;
        let mut cursor = self.best_hash;
        while cursor != fork_hash {
            let block = self
                .store
                .block(&cursor)?
                .ok_or(BlockError::ForkChooser("main chain block missing"))?;
            cursor = block.header.previous_block_hash;
            main_blocks.push(block);
            height = height
                .previous()
                .ok_or(BlockError::ForkChooser("fork point above the tip"))?;
        }
        debug_assert_eq!(height, fork_height);

        let side_work = Chain::chain_work(side_blocks.iter());
        let main_work = Chain::chain_work(main_blocks.iter());
        if side_work <= main_work {
            debug!(
                side = side_blocks.len(),
                main = main_blocks.len(),
                "side chain stored; not heavier than the main chain"
            );
            return Ok(ProcessOutcome::SideChainStored);
        }

        info!(
            fork_height = fork_height.0,
            disconnecting = main_blocks.len(),
            connecting = side_blocks.len(),
            "reorganizing to a heavier chain"
        );

        // Disconnect tip-first; main_blocks is already tip→fork ordered.
        for block in main_blocks.iter() {
            self.disconnect_tip(block)?;
        }

        // Resurrect the disconnected transactions best-effort, with the fee
        // observed against the rolled-back UTXO set.
        for block in main_blocks.iter() {
            for tx in block.transactions.iter().skip(1) {
                let fee = self.observed_fee(tx).unwrap_or(0);
                let _ = self.mempool.add(tx.clone(), self.height, fee);
            }
        }

        let mut connected: Vec<&Block> = Vec::new();
        for (offset, block) in side_blocks.iter().enumerate() {
            let target_height = Height(fork_height.0 + offset as u32 + 1);
            if let Err(err) = self.connect_block(block, target_height, Some(pow)) {
                warn!(%err, "reorganization failed; restoring the previous chain");

                for done in connected.iter().rev() {
                    self.disconnect_tip(done)?;
                }
                // The original blocks were valid on this chain; replay them
                // without the proof checks.
                for block in main_blocks.iter().rev() {
                    let replay_height = self.height.next();
                    self.connect_block(block, replay_height, None)?;
                }
                return Err(err);
            }
            connected.push(block);
        }

        metrics::counter!("chain.reorganizations").increment(1);
        Ok(ProcessOutcome::Reorganized)
    }

    /// Validate `tx` for mempool admission against the current tip, and
    /// pool it on success. Returns the fee.
    pub fn accept_to_mempool(&self, tx: Arc<Transaction>) -> Result<i64, TransactionError> {
        if tx.is_coinbase() {
            return Err(TransactionError::CoinbasePosition);
        }
        let fee = validate_transparent(&tx, &self.utxo, self.height.next(), &self.params)?;
        if tx.has_shielded_components() {
            self.shielded.validate_transaction(&tx)?;
        }
        if tx.tx_type.is_token_operation() {
            validate_token_operation(&tx, self.tokens.as_ref())?;
        }
        self.mempool.add(tx, self.height, fee)?;
        Ok(fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::AlwaysValidPow;
    use crate::subsidy::block_subsidy;
    use crate::transaction::sign::TestKey;
    use umbra_chain::block::{merkle, Header};
    use umbra_chain::parameters::Network;
    use umbra_chain::transaction::{Memo, TxType};
    use umbra_chain::transparent::{Input, OutPoint, Output, Script};
    use umbra_state::StructuralVerifier;

    fn new_chain() -> Chain {
        let params = NetworkParameters::mainnet();
        Chain::init(
            params,
            &Config::ephemeral(),
            Box::new(StructuralVerifier),
            Box::new(crate::tokens::MemoryTokenLedger::new()),
        )
        .expect("chain initializes")
    }

    fn coinbase(params: &NetworkParameters, height: Height, key: &TestKey, fees: i64) -> Transaction {
        Transaction::new(
            1,
            TxType::Transparent,
            vec![Input {
                previous_outpoint: OutPoint::coinbase_sentinel(),
                signature_script: Script(height.0.to_le_bytes().to_vec()),
                sequence: 0xffff_ffff,
            }],
            vec![Output {
                value: block_subsidy(height, params) + fees,
                pk_script: key.lock_script(),
            }],
            0,
            Memo::empty(),
        )
    }

    fn build_block(
        chain: &Chain,
        parent: block::Hash,
        height: Height,
        key: &TestKey,
        mut txs: Vec<Arc<Transaction>>,
        fees: i64,
    ) -> Arc<Block> {
        let mut transactions =
            vec![Arc::new(coinbase(chain.params(), height, key, fees))];
        transactions.append(&mut txs);
        let merkle_root: merkle::Root = transactions.iter().map(|tx| tx.hash()).collect();
        let header = Header::new(
            1,
            parent,
            merkle_root,
            Utc::now(),
            chain.params().pow_limit,
            height.0,
            vec![],
        );
        Arc::new(Block {
            header,
            transactions,
        })
    }

    fn extend_tip(chain: &mut Chain, key: &TestKey, txs: Vec<Arc<Transaction>>, fees: i64) -> Arc<Block> {
        let block = build_block(
            chain,
            chain.best_hash(),
            chain.height().next(),
            key,
            txs,
            fees,
        );
        assert_eq!(
            chain.process_block(block.clone(), &AlwaysValidPow).unwrap(),
            ProcessOutcome::Connected
        );
        block
    }

    #[test]
    fn init_commits_genesis_once() {
        let chain = new_chain();
        assert_eq!(chain.height(), Height(0));
        assert_eq!(
            chain.best_hash(),
            umbra_chain::parameters::genesis_hash(Network::Mainnet)
        );
        // Tip invariant: best_hash references a stored block.
        assert!(chain.contains_block(&chain.best_hash()).unwrap());
    }

    #[test]
    fn connecting_blocks_advances_the_tip() {
        let mut chain = new_chain();
        let key = TestKey::from_byte(1);
        let b1 = extend_tip(&mut chain, &key, vec![], 0);
        let b2 = extend_tip(&mut chain, &key, vec![], 0);
        assert_eq!(chain.height(), Height(2));
        assert_eq!(chain.best_hash(), b2.hash());

        // Duplicate submission is rejected.
        assert!(matches!(
            chain.process_block(b1, &AlwaysValidPow),
            Err(BlockError::DuplicateBlock(_))
        ));
    }

    #[test]
    fn unknown_parent_is_an_orphan() {
        let mut chain = new_chain();
        let key = TestKey::from_byte(1);
        let block = build_block(
            &chain,
            block::Hash([0x77; 32]),
            Height(5),
            &key,
            vec![],
            0,
        );
        assert!(matches!(
            chain.process_block(block, &AlwaysValidPow),
            Err(BlockError::OrphanBlock(_))
        ));
        assert_eq!(chain.height(), Height(0));
    }

    #[test]
    fn wrong_bits_are_rejected_not_rewritten() {
        let mut chain = new_chain();
        let key = TestKey::from_byte(1);
        let mut block = (*build_block(
            &chain,
            chain.best_hash(),
            Height(1),
            &key,
            vec![],
            0,
        ))
        .clone();
        block.header = Header::new(
            block.header.version,
            block.header.previous_block_hash,
            block.header.merkle_root,
            block.header.time,
            umbra_chain::work::difficulty::CompactDifficulty(0x1c00ffff),
            block.header.nonce,
            block.header.solution.clone(),
        );
        assert!(matches!(
            chain.process_block(Arc::new(block), &AlwaysValidPow),
            Err(BlockError::WrongDifficulty { .. })
        ));
    }

    #[test]
    fn overclaiming_coinbase_is_rejected() {
        let mut chain = new_chain();
        let key = TestKey::from_byte(1);
        let block = build_block(
            &chain,
            chain.best_hash(),
            Height(1),
            &key,
            vec![],
            1, // claims one satoshi of fees that no transaction paid
        );
        assert!(matches!(
            chain.process_block(block, &AlwaysValidPow),
            Err(BlockError::SubsidyTooLarge { .. })
        ));
        assert_eq!(chain.height(), Height(0));
    }

    #[test]
    fn checkpoint_mismatch_is_rejected() {
        let mut params = NetworkParameters::mainnet();
        params
            .checkpoints
            .insert(Height(1), block::Hash([0x12; 32]));
        let mut chain = Chain::init(
            params,
            &Config::ephemeral(),
            Box::new(StructuralVerifier),
            Box::new(crate::tokens::MemoryTokenLedger::new()),
        )
        .unwrap();
        let key = TestKey::from_byte(1);
        let block = build_block(&chain, chain.best_hash(), Height(1), &key, vec![], 0);
        assert!(matches!(
            chain.process_block(block, &AlwaysValidPow),
            Err(BlockError::CheckpointMismatch(_))
        ));
    }

    #[test]
    fn confirmed_transactions_leave_the_mempool() {
        let mut chain = new_chain();
        let key = TestKey::from_byte(1);
        let funding = extend_tip(&mut chain, &key, vec![], 0);

        let entry = chain
            .utxo()
            .get(&OutPoint {
                hash: funding.transactions[0].hash(),
                index: 0,
            })
            .unwrap()
            .unwrap();
        let spend = Arc::new(key.spend(
            &[&entry],
            vec![Output {
                value: entry.value - 1000,
                pk_script: key.lock_script(),
            }],
            TxType::Transparent,
            Memo::empty(),
        ));

        chain.accept_to_mempool(spend.clone()).unwrap();
        assert!(chain.mempool().contains(&spend.hash()));

        extend_tip(&mut chain, &key, vec![spend.clone()], 1000);
        assert!(!chain.mempool().contains(&spend.hash()));
    }

    /// S5: a heavier side chain rooted two blocks below the tip wins, and
    /// disconnected transactions return to the mempool.
    #[test]
    fn reorganization_switches_to_the_heavier_chain() {
        let mut chain = new_chain();
        let main_key = TestKey::from_byte(1);
        let side_key = TestKey::from_byte(2);

        // Main chain: G -> M1 -> M2 -> M3 (tip A at height 3, fork at 1).
        let m1 = extend_tip(&mut chain, &main_key, vec![], 0);
        let m1_coinbase = chain
            .utxo()
            .get(&OutPoint {
                hash: m1.transactions[0].hash(),
                index: 0,
            })
            .unwrap()
            .unwrap();
        let spend = Arc::new(main_key.spend(
            &[&m1_coinbase],
            vec![Output {
                value: m1_coinbase.value - 1000,
                pk_script: main_key.lock_script(),
            }],
            TxType::Transparent,
            Memo::empty(),
        ));
        let _m2 = extend_tip(&mut chain, &main_key, vec![spend.clone()], 1000);
        let _m3 = extend_tip(&mut chain, &main_key, vec![], 0);
        assert_eq!(chain.height(), Height(3));

        let utxo_before_side: Vec<_> = chain.utxo().snapshot().unwrap();

        // Side chain from M1: S2 -> S3 -> S4 (tip B at height 4).
        let s2 = build_block(&chain, m1.hash(), Height(2), &side_key, vec![], 0);
        assert_eq!(
            chain.process_block(s2.clone(), &AlwaysValidPow).unwrap(),
            ProcessOutcome::SideChainStored
        );
        let s3 = build_block(&chain, s2.hash(), Height(3), &side_key, vec![], 0);
        assert_eq!(
            chain.process_block(s3.clone(), &AlwaysValidPow).unwrap(),
            ProcessOutcome::SideChainStored
        );
        // The side chain is still not heavier at equal length; the tip and
        // the UTXO set are untouched.
        assert_eq!(chain.height(), Height(3));
        assert_eq!(chain.utxo().snapshot().unwrap(), utxo_before_side);

        let s4 = build_block(&chain, s3.hash(), Height(4), &side_key, vec![], 0);
        assert_eq!(
            chain.process_block(s4.clone(), &AlwaysValidPow).unwrap(),
            ProcessOutcome::Reorganized
        );

        assert_eq!(chain.best_hash(), s4.hash());
        assert_eq!(chain.height(), Height(4));

        // The disconnected spend is back in the mempool.
        assert!(chain.mempool().contains(&spend.hash()));
        // Its input is unspent again.
        assert!(chain.utxo().get(&m1_coinbase.outpoint()).unwrap().is_some());
        // Main-branch coinbase outputs above the fork are gone; side-branch
        // coinbases exist.
        assert!(chain
            .utxo()
            .get(&OutPoint {
                hash: s4.transactions[0].hash(),
                index: 0,
            })
            .unwrap()
            .is_some());

        // Height invariant: walking prev-links from the tip reaches genesis
        // in exactly `height` steps.
        let mut cursor = chain.best_hash();
        let mut steps = 0;
        while let Some(block) = chain.block(&cursor).unwrap() {
            if block.header.previous_block_hash == block::Hash::zero() {
                break;
            }
            cursor = block.header.previous_block_hash;
            steps += 1;
        }
        assert_eq!(steps, chain.height().0);
    }

    #[test]
    fn failed_reorganization_restores_the_original_chain() {
        let mut chain = new_chain();
        let main_key = TestKey::from_byte(1);
        let side_key = TestKey::from_byte(2);

        let m1 = extend_tip(&mut chain, &main_key, vec![], 0);
        let _m2 = extend_tip(&mut chain, &main_key, vec![], 0);
        let before_hash = chain.best_hash();
        let before_height = chain.height();
        let before_utxo = chain.utxo().snapshot().unwrap();

        // Side chain: one good block, then one that overclaims its subsidy.
        let s2 = build_block(&chain, m1.hash(), Height(2), &side_key, vec![], 0);
        chain.process_block(s2.clone(), &AlwaysValidPow).unwrap();
        let bad = build_block(&chain, s2.hash(), Height(3), &side_key, vec![], 5_000);
        let err = chain.process_block(bad, &AlwaysValidPow).unwrap_err();
        assert!(matches!(err, BlockError::SubsidyTooLarge { .. }));

        // The original chain is back.
        assert_eq!(chain.best_hash(), before_hash);
        assert_eq!(chain.height(), before_height);
        assert_eq!(chain.utxo().snapshot().unwrap(), before_utxo);
    }
}
