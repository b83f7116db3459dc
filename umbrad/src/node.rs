//! Component wiring: one `Node` owns the chain behind its exclusive lock,
//! the shared mempool, and the sync engine task.

use std::sync::Arc;

use color_eyre::eyre::Report;
use tokio::sync::RwLock;
use tracing::{error, info};

use umbra_chain::block::{self, Block};
use umbra_chain::parameters::NetworkParameters;
use umbra_chain::transaction::Transaction;
use umbra_consensus::tokens::MemoryTokenLedger;
use umbra_consensus::{Chain, Mempool, PowEngine, Sha256dPow};
use umbra_network::SyncEngine;
use umbra_state::StructuralVerifier;

use crate::config::UmbradConfig;
use crate::interfaces::{MinerInterface, NodeStats, StatsSource};

/// The running node.
pub struct Node {
    chain: Arc<RwLock<Chain>>,
    mempool: Arc<Mempool>,
    pow: Arc<dyn PowEngine>,
    engine: Arc<SyncEngine>,
    engine_task: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl Node {
    /// Build every component and spawn the sync engine.
    pub async fn start(config: UmbradConfig) -> Result<Node, Report> {
        let params = NetworkParameters::for_network(config.network.network);

        let chain = Chain::init(
            params.clone(),
            &config.state,
            Box::new(StructuralVerifier),
            Box::new(MemoryTokenLedger::new()),
        )?;
        info!(
            height = chain.height().0,
            best = %chain.best_hash(),
            "chain state loaded"
        );

        let mempool = chain.mempool();
        let chain = Arc::new(RwLock::new(chain));
        let pow: Arc<dyn PowEngine> = Arc::new(Sha256dPow);

        let engine = Arc::new(SyncEngine::new(
            config.network,
            chain.clone(),
            pow.clone(),
            mempool.clone(),
            params,
        ));
        let engine_task = {
            let engine = engine.clone();
            tokio::spawn(async move {
                let result = engine.run().await;
                if let Err(ref err) = result {
                    error!(%err, "sync engine exited");
                }
                result
            })
        };

        Ok(Node {
            chain,
            mempool,
            pow,
            engine,
            engine_task,
        })
    }

    pub async fn shutdown(self) {
        self.engine.shutdown();
        let _ = self.engine_task.await;
    }
}

/// The miner seam: locally solved blocks enter the same pipeline as
/// relayed ones and are announced over the same path.
pub struct NodeMiner {
    chain: Arc<RwLock<Chain>>,
    mempool: Arc<Mempool>,
    pow: Arc<dyn PowEngine>,
    engine: Arc<SyncEngine>,
}

impl Node {
    pub fn miner_handle(&self) -> NodeMiner {
        NodeMiner {
            chain: self.chain.clone(),
            mempool: self.mempool.clone(),
            pow: self.pow.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl MinerInterface for NodeMiner {
    fn tip(&self) -> (block::Hash, block::Height) {
        let chain = self.chain.blocking_read();
        (chain.best_hash(), chain.height())
    }

    fn template_transactions(&self, limit: usize) -> Vec<Arc<Transaction>> {
        self.mempool.get_by_priority(limit)
    }

    fn submit_block(&self, block: Arc<Block>) -> Result<(), umbra_consensus::BlockError> {
        let mut chain = self.chain.blocking_write();
        chain.process_block(block.clone(), self.pow.as_ref())?;
        self.engine.announce_local_block(&block);
        Ok(())
    }
}

impl StatsSource for NodeMiner {
    fn stats(&self) -> NodeStats {
        let chain = self.chain.blocking_read();
        NodeStats {
            height: chain.height().0,
            best_hash: Some(chain.best_hash()),
            peer_count: self.engine.peers().peer_count(),
            mempool_size: self.mempool.len(),
        }
    }
}
