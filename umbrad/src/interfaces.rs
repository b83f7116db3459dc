//! Capability interfaces for the node's thin collaborators.
//!
//! The launcher, JSON-RPC surface, mining loop, Stratum pool server,
//! contract VM, onion proxy, and wallet all live outside the core. The
//! core consumes them (or serves them) only through the narrow seams
//! defined here and in `umbra-consensus` (`PowEngine`, `TokenLedger`,
//! `ProofVerifier`); implementations are injected at startup.

use std::sync::Arc;

use umbra_chain::block::{self, Block};
use umbra_chain::transaction::Transaction;

/// The chain surface a mining loop consumes: a template of prioritized
/// transactions and a submission path that feeds the same pipeline as a
/// relayed block.
pub trait MinerInterface: Send + Sync {
    /// The parent hash and height the next block should build on.
    fn tip(&self) -> (block::Hash, block::Height);

    /// Up to `limit` mempool transactions, fee-priority order.
    fn template_transactions(&self, limit: usize) -> Vec<Arc<Transaction>>;

    /// Submit a solved block. Errors are the chain's typed rejections; the
    /// miner backs off and retries rather than proceeding on error.
    fn submit_block(&self, block: Arc<Block>) -> Result<(), umbra_consensus::BlockError>;
}

/// The wallet surface the node exposes to its (external) wallet: enough to
/// build and submit transparent spends. Key management never enters the
/// core.
pub trait WalletInterface: Send + Sync {
    fn balance(&self, pk_script: &umbra_chain::transparent::Script) -> i64;
    fn submit_transaction(
        &self,
        tx: Arc<Transaction>,
    ) -> Result<(), umbra_consensus::TransactionError>;
}

/// Aggregate numbers a Stratum pool server or RPC status surface reads.
#[derive(Clone, Debug, Default)]
pub struct NodeStats {
    pub height: u32,
    pub best_hash: Option<block::Hash>,
    pub peer_count: usize,
    pub mempool_size: usize,
}

pub trait StatsSource: Send + Sync {
    fn stats(&self) -> NodeStats;
}

/// An alternate dialer seam so an onion-routing proxy can supply the
/// node's outbound TCP streams.
pub trait ProxyDialer: Send + Sync {
    fn proxy_addr(&self) -> std::net::SocketAddr;
}
