//! The sync engine: the inbound listener, the outbound dialer with
//! reconnection, and the periodic maintenance loops.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use umbra_chain::block::Block;
use umbra_consensus::{Chain, PowEngine};

use crate::connection::{self, ConnectionContext};
use crate::constants::{
    MAINTENANCE_INTERVAL, MAX_INBOUND_PEERS, MAX_OUTBOUND_PEERS, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_BACKOFF_CAP, RECONNECT_SCORE_CUTOFF,
};
use crate::handshake;
use crate::peer::Peer;
use crate::peer_set::{PeerHandle, PeerSet};
use crate::protocol::message::{BlockLocator, Message, SendCompact};
use crate::protocol::Codec;
use crate::NetworkConfig;

/// Per-peer outbox depth. Bounded so one slow peer cannot hold bursts of
/// broadcast memory.
const OUTBOX_DEPTH: usize = 256;

/// The P2P synchronization engine.
pub struct SyncEngine {
    config: NetworkConfig,
    ctx: ConnectionContext,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl SyncEngine {
    pub fn new(
        config: NetworkConfig,
        chain: Arc<tokio::sync::RwLock<Chain>>,
        pow: Arc<dyn PowEngine>,
        mempool: Arc<umbra_consensus::Mempool>,
        params: umbra_chain::parameters::NetworkParameters,
    ) -> SyncEngine {
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = ConnectionContext {
            chain,
            pow,
            peers: Arc::new(PeerSet::new()),
            mempool,
            params,
            queued_blocks: Arc::new(Mutex::new(HashMap::new())),
        };
        SyncEngine {
            config,
            ctx,
            stop_tx,
            stop_rx,
        }
    }

    /// The shared peer registry (for announcements from outside the
    /// engine, e.g. locally mined blocks).
    pub fn peers(&self) -> Arc<PeerSet> {
        self.ctx.peers.clone()
    }

    /// Announce a locally produced block to every peer, exactly as a
    /// relayed block would be.
    pub fn announce_local_block(&self, block: &Block) {
        self.ctx.peers.mark_block_known(&block.hash());
        connection::announce_block(&self.ctx.peers, block, None);
    }

    /// Signal every task to exit promptly.
    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Run the engine: listener, initial dials, and maintenance. Resolves
    /// when shutdown is signalled.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "listening for inbound peers");

        for addr in self.config.initial_peers.clone() {
            self.spawn_outbound(addr);
        }

        let maintenance = tokio::spawn(maintenance_loop(
            self.ctx.clone(),
            self.config.clone(),
            self.stop_rx.clone(),
        ));

        let mut stop = self.stop_rx.clone();
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.handle_inbound(stream, addr),
                        Err(err) => warn!(%err, "inbound accept failed"),
                    }
                }
            }
        }

        maintenance.abort();
        Ok(())
    }

    fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) {
        // Over-capacity and banned addresses are closed without handshake.
        if self.ctx.peers.inbound_count() >= MAX_INBOUND_PEERS {
            debug!(%addr, "inbound slots full; dropping connection");
            return;
        }
        if self.ctx.peers.is_banned(&addr.ip()) {
            debug!(%addr, "rejecting banned address");
            return;
        }
        let ctx = self.ctx.clone();
        let stop = self.stop_rx.clone();
        tokio::spawn(async move {
            let _ = serve_peer(ctx, stream, addr, true, stop).await;
        });
    }

    fn spawn_outbound(&self, addr: SocketAddr) {
        if self.ctx.peers.outbound_count() >= MAX_OUTBOUND_PEERS {
            debug!(%addr, "outbound slots full; not dialing");
            return;
        }
        let ctx = self.ctx.clone();
        let stop = self.stop_rx.clone();
        tokio::spawn(async move {
            dial_with_reconnect(ctx, addr, stop).await;
        });
    }
}

/// Dial `addr`, drive the peer, and redial with exponential backoff after
/// disconnects that were not the peer's fault.
async fn dial_with_reconnect(
    ctx: ConnectionContext,
    addr: SocketAddr,
    mut stop: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        if *stop.borrow() {
            return;
        }
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                match serve_peer(ctx.clone(), stream, addr, false, stop.clone()).await {
                    Some(score) if score <= RECONNECT_SCORE_CUTOFF => {
                        debug!(%addr, score, "not reconnecting to a misbehaving peer");
                        return;
                    }
                    // A completed session resets the backoff schedule;
                    // a failed handshake keeps backing off.
                    Some(_) => attempt = 0,
                    None => {}
                }
            }
            Err(err) => {
                debug!(%addr, %err, "outbound dial failed");
            }
        }
        if attempt >= MAX_RECONNECT_ATTEMPTS {
            warn!(%addr, "giving up on peer after repeated failures");
            return;
        }

        // 2^(attempt-1) seconds plus up to 25% jitter, capped.
        let base = Duration::from_secs(1u64 << attempt.saturating_sub(1).min(16));
        let base = base.min(RECONNECT_BACKOFF_CAP);
        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
        let delay = (base + jitter).min(RECONNECT_BACKOFF_CAP);
        debug!(%addr, ?delay, attempt, "scheduling reconnect");
        tokio::select! {
            _ = stop.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Handshake and run one peer connection. Returns the final score, or
/// `None` when the handshake failed.
async fn serve_peer(
    ctx: ConnectionContext,
    stream: TcpStream,
    addr: SocketAddr,
    inbound: bool,
    stop: watch::Receiver<bool>,
) -> Option<i32> {
    let codec = Codec::builder()
        .for_network(ctx.params.network)
        .with_metrics_label(addr.to_string())
        .finish();
    let mut framed = Framed::new(stream, codec);

    let local_height = { ctx.chain.read().await.height().0 as i32 };
    let remote = match handshake::perform(&mut framed, local_height, inbound).await {
        Ok(remote) => remote,
        Err(err) => {
            debug!(%addr, %err, "handshake failed");
            return None;
        }
    };
    info!(%addr, inbound, agent = %remote.user_agent, "peer connected");

    let mut peer = Peer::new(addr, inbound);
    peer.version = Some(remote);
    let (sender, outbox) = mpsc::channel(OUTBOX_DEPTH);
    let handle = PeerHandle {
        peer: Arc::new(Mutex::new(peer)),
        sender,
    };
    ctx.peers.register(handle.clone());
    ctx.peers.add_known_addr(addr.to_string());

    // Post-handshake negotiation: headers-first relay, compact-block
    // relay, and an initial sync request from our tip.
    let _ = handle.sender.try_send(Message::SendHeaders);
    let _ = handle.sender.try_send(Message::SendCompact(SendCompact {
        announce: true,
        version: 1,
    }));
    let best = { ctx.chain.read().await.best_hash() };
    let _ = handle
        .sender
        .try_send(Message::GetHeaders(BlockLocator::open_ended(best)));

    Some(connection::run_peer(ctx, framed, handle, outbox, stop).await)
}

/// Periodic upkeep: score decay and ban expiry every ten minutes, orphan
/// expiry each pass, and redials when the peer count reaches zero.
async fn maintenance_loop(
    ctx: ConnectionContext,
    config: NetworkConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut decay = tokio::time::interval(MAINTENANCE_INTERVAL);
    let mut sweep = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = decay.tick() => {
                ctx.peers.for_each_peer(|peer| peer.decay_score());
                ctx.peers.expire_bans();
            }
            _ = sweep.tick() => {
                ctx.mempool.expire_orphans();
                if ctx.peers.peer_count() == 0 {
                    for addr in config.initial_peers.iter() {
                        if ctx.peers.is_banned(&addr.ip()) {
                            continue;
                        }
                        let ctx = ctx.clone();
                        let addr = *addr;
                        let stop = stop.clone();
                        tokio::spawn(async move {
                            dial_with_reconnect(ctx, addr, stop).await;
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_chain::parameters::{Network, NetworkParameters};
    use umbra_consensus::tokens::MemoryTokenLedger;
    use umbra_consensus::{Mempool, Sha256dPow};
    use umbra_state::{Config as StateConfig, StructuralVerifier};

    fn engine(listen: &str, initial: Vec<SocketAddr>) -> SyncEngine {
        let params = NetworkParameters::for_network(Network::Testnet);
        let chain = Chain::init(
            params.clone(),
            &StateConfig::ephemeral(),
            Box::new(StructuralVerifier),
            Box::new(MemoryTokenLedger::new()),
        )
        .expect("chain initializes");
        let mempool = chain.mempool();
        let config = NetworkConfig {
            network: Network::Testnet,
            listen_addr: listen.parse().unwrap(),
            initial_peers: initial,
        };
        SyncEngine::new(
            config,
            Arc::new(tokio::sync::RwLock::new(chain)),
            Arc::new(Sha256dPow),
            mempool,
            params,
        )
    }

    #[tokio::test]
    async fn two_nodes_connect_and_register_each_other() {
        let server = engine("127.0.0.1:0", vec![]);
        // Bind a throwaway listener to learn a free port, then rebind the
        // server engine onto it.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = probe.local_addr().unwrap();
        drop(probe);

        let mut server = server;
        server.config.listen_addr = server_addr;
        let server_peers = server.peers();
        let server_task = tokio::spawn(async move { server.run().await });

        // Give the listener a moment to bind.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = engine("127.0.0.1:0", vec![server_addr]);
        let client_peers = client.peers();
        let client_task = tokio::spawn(async move { client.run().await });

        // Wait for the handshake to complete on both sides.
        let mut connected = false;
        for _ in 0..50 {
            if server_peers.peer_count() == 1 && client_peers.peer_count() == 1 {
                connected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(connected, "peers never finished the handshake");
        assert_eq!(server_peers.inbound_count(), 1);
        assert_eq!(client_peers.outbound_count(), 1);

        server_task.abort();
        client_task.abort();
    }

    #[tokio::test]
    async fn banned_addresses_are_refused_before_handshake() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = probe.local_addr().unwrap();
        drop(probe);

        let mut server = engine("127.0.0.1:0", vec![]);
        server.config.listen_addr = server_addr;
        let server_peers = server.peers();
        // Ban the loopback address the client will arrive from.
        server_peers.ban(
            "127.0.0.1".parse().unwrap(),
            std::time::Instant::now() + Duration::from_secs(60),
        );
        let server_task = tokio::spawn(async move { server.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = engine("127.0.0.1:0", vec![server_addr]);
        let client_peers = client.peers();
        let client_task = tokio::spawn(async move { client.run().await });

        // The connection must be dropped without a handshake: neither side
        // ever registers a peer.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(server_peers.peer_count(), 0);
        assert_eq!(client_peers.peer_count(), 0);

        server_task.abort();
        client_task.abort();
    }
}
