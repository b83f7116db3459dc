//! The per-peer message loop.
//!
//! One logical task per peer: a reader that dispatches inbound messages in
//! order, a writer draining the peer's outbox channel, and a ping timer.
//! All outbound traffic for a peer funnels through its outbox, so writes
//! are strictly ordered too.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use umbra_chain::block::{self, Block, CountedHeader};
use umbra_chain::parameters::NetworkParameters;
use umbra_chain::transaction::Transaction;
use umbra_consensus::error::{BlockError, MempoolError, TransactionError};
use umbra_consensus::{Chain, Mempool, PowEngine, ProcessOutcome};

use crate::constants::{
    MAX_BLOCK_INV_RESPONSE, MAX_HEADERS_RESPONSE, MAX_QUEUED_BLOCKS, PING_INTERVAL, READ_TIMEOUT,
};
use crate::peer::Behaviour;
use crate::peer_set::{PeerHandle, PeerSet};
use crate::protocol::message::{
    BlockLocator, GetBlockTxn, BlockTxn, Message, Nonce, Reject, RejectReason,
};
use crate::protocol::{Codec, InvKind, Inventory};

/// Everything a peer task needs to dispatch messages.
#[derive(Clone)]
pub struct ConnectionContext {
    pub chain: Arc<tokio::sync::RwLock<Chain>>,
    pub pow: Arc<dyn PowEngine>,
    pub peers: Arc<PeerSet>,
    pub mempool: Arc<Mempool>,
    pub params: NetworkParameters,
    /// Out-of-order blocks waiting for their parent, keyed by parent hash.
    pub queued_blocks: Arc<Mutex<HashMap<block::Hash, Arc<Block>>>>,
}

impl ConnectionContext {
    fn queue_block(&self, block: Arc<Block>) {
        let mut queued = self.queued_blocks.lock().expect("queue lock poisoned");
        if queued.len() >= MAX_QUEUED_BLOCKS {
            return;
        }
        queued.insert(block.header.previous_block_hash, block);
    }

    fn take_queued_child(&self, parent: &block::Hash) -> Option<Arc<Block>> {
        self.queued_blocks
            .lock()
            .expect("queue lock poisoned")
            .remove(parent)
    }
}

/// Drive a handshaken peer until disconnect. Returns the final score.
pub async fn run_peer(
    ctx: ConnectionContext,
    framed: Framed<TcpStream, Codec>,
    handle: PeerHandle,
    outbox: mpsc::Receiver<Message>,
    mut stop: watch::Receiver<bool>,
) -> i32 {
    let addr = handle.peer.lock().expect("peer lock poisoned").addr;
    let (sink, mut stream) = framed.split();

    let writer = tokio::spawn(write_loop(sink, outbox));
    let pinger = tokio::spawn(ping_loop(handle.sender.clone(), stop.clone()));

    loop {
        let message = tokio::select! {
            _ = stop.changed() => break,
            message = timeout(READ_TIMEOUT, stream.next()) => message,
        };
        match message {
            Err(_) => {
                debug!(%addr, "peer read deadline expired");
                adjust(&handle, Behaviour::Timeout);
                break;
            }
            Ok(None) => {
                debug!(%addr, "peer closed the connection");
                break;
            }
            Ok(Some(Err(err))) => {
                debug!(%addr, %err, "malformed frame from peer");
                adjust(&handle, Behaviour::ProtocolViolation);
                send(
                    &handle,
                    Message::Reject(Reject::new("frame", RejectReason::Malformed, "bad frame")),
                );
                break;
            }
            Ok(Some(Ok(message))) => {
                let within_rate = handle
                    .peer
                    .lock()
                    .expect("peer lock poisoned")
                    .record_message();
                if !within_rate {
                    warn!(%addr, "peer exceeded the message rate limit");
                    if adjust(&handle, Behaviour::Misbehavior) {
                        break;
                    }
                    continue;
                }
                if dispatch(&ctx, &handle, message).await {
                    break;
                }
            }
        }
    }

    writer.abort();
    pinger.abort();
    ctx.peers.deregister(&addr);

    let (score, should_ban) = {
        let peer = handle.peer.lock().expect("peer lock poisoned");
        (peer.score(), peer.should_ban())
    };
    if should_ban {
        let until = std::time::Instant::now() + crate::peer::ban_duration_for_score(score);
        ctx.peers.ban(addr.ip(), until);
    }
    info!(%addr, score, "peer disconnected");
    score
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<Framed<TcpStream, Codec>, Message>,
    mut outbox: mpsc::Receiver<Message>,
) {
    while let Some(message) = outbox.recv().await {
        if let Err(err) = sink.send(message).await {
            debug!(%err, "peer write failed");
            break;
        }
    }
}

async fn ping_loop(sender: mpsc::Sender<Message>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(PING_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => {
                let nonce = Nonce(rand::thread_rng().gen());
                if sender.send(Message::Ping(nonce)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Apply a behaviour adjustment; returns true when the peer crossed the
/// ban threshold and must be disconnected.
fn adjust(handle: &PeerHandle, behaviour: Behaviour) -> bool {
    let mut peer = handle.peer.lock().expect("peer lock poisoned");
    peer.adjust(behaviour);
    peer.should_ban()
}

fn send(handle: &PeerHandle, message: Message) {
    if handle.sender.try_send(message).is_err() {
        trace!("peer outbox full; dropping message");
    }
}

/// Handle one inbound message. Returns true to disconnect the peer.
async fn dispatch(ctx: &ConnectionContext, handle: &PeerHandle, message: Message) -> bool {
    trace!(%message, "dispatching peer message");
    match message {
        Message::Ping(nonce) => {
            send(handle, Message::Pong(nonce));
            false
        }
        Message::Pong(_) => false,
        Message::Inv(inventory) => {
            handle_inv(ctx, handle, inventory);
            false
        }
        Message::GetData(inventory) => {
            handle_get_data(ctx, handle, inventory).await;
            false
        }
        Message::NotFound(inventory) => {
            debug!(count = inventory.hashes.len(), "peer lacked requested items");
            false
        }
        Message::Block(block) => handle_block(ctx, handle, block).await,
        Message::Tx(tx) => handle_tx(ctx, handle, tx).await,
        Message::GetHeaders(locator) => {
            handle_get_headers(ctx, handle, locator).await;
            false
        }
        Message::GetBlocks(locator) => {
            handle_get_blocks(ctx, handle, locator).await;
            false
        }
        Message::Headers(headers) => {
            handle_headers(ctx, handle, headers);
            false
        }
        Message::Mempool => {
            let inventory = Inventory::txs(ctx.mempool.fingerprints());
            if !inventory.is_empty() {
                send(handle, Message::Inv(inventory));
            }
            false
        }
        Message::Addr(addrs) => {
            for addr in addrs {
                ctx.peers.add_known_addr(addr);
            }
            false
        }
        Message::GetAddr => {
            let addrs = ctx.peers.known_addrs();
            if !addrs.is_empty() {
                send(handle, Message::Addr(addrs));
            }
            false
        }
        Message::FeeFilter(rate) => {
            handle.peer.lock().expect("peer lock poisoned").fee_filter = rate;
            false
        }
        Message::SendHeaders => {
            handle.peer.lock().expect("peer lock poisoned").prefers_headers = true;
            false
        }
        Message::SendCompact(negotiation) => {
            let mut peer = handle.peer.lock().expect("peer lock poisoned");
            peer.wants_compact_blocks = negotiation.announce && negotiation.version == 1;
            false
        }
        Message::CompactBlock(compact) => {
            // Pass-through processor: fall back to a full block fetch.
            let hash = compact.header.hash();
            if !ctx.peers.block_is_known(&hash) {
                send(
                    handle,
                    Message::GetData(Inventory::blocks(std::iter::once(hash))),
                );
            }
            false
        }
        Message::GetBlockTxn(request) => {
            handle_get_block_txn(ctx, handle, request).await;
            false
        }
        Message::BlockTxn(_) => false,
        Message::Reject(reject) => {
            debug!(message = %reject.message, reason = %reject.reason, "peer rejected our message");
            false
        }
        Message::Version(_) | Message::Verack => {
            // The handshake is over; these are misbehavior now.
            adjust(handle, Behaviour::Misbehavior)
        }
        Message::Unknown(name) => {
            warn!(command = %name, "unknown command from peer");
            send(
                handle,
                Message::Reject(Reject::new(&name, RejectReason::Malformed, "unknown command")),
            );
            adjust(handle, Behaviour::ProtocolViolation)
        }
    }
}

fn handle_inv(ctx: &ConnectionContext, handle: &PeerHandle, inventory: Inventory) {
    let unknown: Vec<[u8; 32]> = match inventory.kind {
        InvKind::Block => inventory
            .block_hashes()
            .filter(|hash| !ctx.peers.block_is_known(hash))
            .map(|hash| hash.0)
            .collect(),
        InvKind::Tx => inventory
            .tx_hashes()
            .filter(|hash| !ctx.peers.tx_is_known(hash))
            .map(|hash| hash.0)
            .collect(),
    };
    if !unknown.is_empty() {
        send(
            handle,
            Message::GetData(Inventory {
                kind: inventory.kind,
                hashes: unknown,
            }),
        );
    }
}

async fn handle_get_data(ctx: &ConnectionContext, handle: &PeerHandle, inventory: Inventory) {
    let mut not_found = Vec::new();
    match inventory.kind {
        InvKind::Block => {
            let chain = ctx.chain.read().await;
            for hash in inventory.block_hashes() {
                match chain.block(&hash) {
                    Ok(Some(block)) => send(handle, Message::Block(Arc::new(block))),
                    _ => not_found.push(hash.0),
                }
            }
        }
        InvKind::Tx => {
            for hash in inventory.tx_hashes() {
                match ctx.mempool.get(&hash) {
                    Some(tx) => send(handle, Message::Tx(tx)),
                    None => not_found.push(hash.0),
                }
            }
        }
    }
    if !not_found.is_empty() {
        send(
            handle,
            Message::NotFound(Inventory {
                kind: inventory.kind,
                hashes: not_found,
            }),
        );
    }
}

/// Announce an accepted block to every other peer: headers to peers that
/// asked for headers-first relay, invs to the rest.
pub fn announce_block(peers: &PeerSet, block: &Block, source: Option<std::net::SocketAddr>) {
    let counted = CountedHeader {
        header: block.header.clone(),
        transaction_count: block.transactions.len(),
    };
    peers.broadcast_filtered(
        Message::Headers(vec![counted]),
        source,
        |peer| peer.prefers_headers,
    );
    peers.broadcast_filtered(
        Message::Inv(Inventory::blocks(std::iter::once(block.hash()))),
        source,
        |peer| !peer.prefers_headers,
    );
}

async fn handle_block(
    ctx: &ConnectionContext,
    handle: &PeerHandle,
    block: Arc<Block>,
) -> bool {
    let hash = block.hash();
    let addr = handle.peer.lock().expect("peer lock poisoned").addr;

    if ctx.peers.block_is_known(&hash) {
        return adjust(handle, Behaviour::Duplicate);
    }
    if block.serialized_size() as u64 > ctx.params.max_block_bytes {
        send(
            handle,
            Message::Reject(
                Reject::new("block", RejectReason::Invalid, "oversized block").with_data(hash.0),
            ),
        );
        return adjust(handle, Behaviour::InvalidBlock);
    }

    let mut pending = Some(block);
    let mut first = true;
    // Connect the block, then any queued children it unblocks.
    while let Some(candidate) = pending.take() {
        let candidate_hash = candidate.hash();
        let outcome = {
            let mut chain = ctx.chain.write().await;
            chain.process_block(candidate.clone(), ctx.pow.as_ref())
        };
        match outcome {
            Ok(result) => {
                ctx.peers.mark_block_known(&candidate_hash);
                if first {
                    let behaviour = if result == ProcessOutcome::SideChainStored {
                        Behaviour::StaleBlock
                    } else {
                        Behaviour::ValidBlock
                    };
                    if adjust(handle, behaviour) {
                        return true;
                    }
                }
                announce_block(&ctx.peers, &candidate, Some(addr));
                promote_orphan_txs(ctx).await;
                pending = ctx.take_queued_child(&candidate_hash);
            }
            Err(BlockError::DuplicateBlock(_)) => {
                ctx.peers.mark_block_known(&candidate_hash);
                if first {
                    return adjust(handle, Behaviour::Duplicate);
                }
                break;
            }
            Err(BlockError::OrphanBlock(_)) => {
                debug!(%candidate_hash, "queueing out-of-order block");
                ctx.queue_block(candidate);
                // Ask the peer for the gap.
                let locator = {
                    let chain = ctx.chain.read().await;
                    chain.best_hash()
                };
                send(
                    handle,
                    Message::GetHeaders(BlockLocator::open_ended(locator)),
                );
                break;
            }
            Err(err) => {
                debug!(%candidate_hash, %err, "rejecting invalid block");
                send(
                    handle,
                    Message::Reject(
                        Reject::new("block", RejectReason::Invalid, "invalid block")
                            .with_data(candidate_hash.0),
                    ),
                );
                if first {
                    return adjust(handle, Behaviour::InvalidBlock);
                }
                break;
            }
        }
        first = false;
    }
    false
}

async fn promote_orphan_txs(ctx: &ConnectionContext) {
    let chain = ctx.chain.read().await;
    let promoted = ctx.mempool.process_orphans(chain.utxo());
    for tx in promoted {
        let hash = tx.hash();
        if chain.accept_to_mempool(tx).is_ok() {
            debug!(%hash, "promoted orphan transaction");
        }
    }
}

async fn handle_tx(ctx: &ConnectionContext, handle: &PeerHandle, tx: Arc<Transaction>) -> bool {
    let hash = tx.hash();
    let addr = handle.peer.lock().expect("peer lock poisoned").addr;

    if ctx.peers.tx_is_known(&hash) {
        return adjust(handle, Behaviour::Duplicate);
    }

    let verdict = {
        let chain = ctx.chain.read().await;
        chain.accept_to_mempool(tx.clone())
    };
    match verdict {
        Ok(fee) => {
            ctx.peers.mark_tx_known(&hash);
            let rate = Mempool::fee_per_kb(fee, tx.serialized_size());
            ctx.peers.broadcast_filtered(
                Message::Inv(Inventory::txs(std::iter::once(hash))),
                Some(addr),
                move |peer| peer.fee_filter <= rate,
            );
            adjust(handle, Behaviour::ValidTx)
        }
        Err(TransactionError::MissingUtxo(_)) => {
            // Inputs we have never seen: quarantine, no penalty.
            ctx.mempool.add_orphan(tx);
            false
        }
        Err(TransactionError::Mempool(MempoolError::Duplicate)) => {
            adjust(handle, Behaviour::Duplicate)
        }
        Err(TransactionError::Mempool(MempoolError::PoolFull)) => {
            send(
                handle,
                Message::Reject(
                    Reject::new("tx", RejectReason::InsufficientFee, "mempool full")
                        .with_data(hash.0),
                ),
            );
            false
        }
        Err(err) => {
            debug!(%hash, %err, "rejecting invalid transaction");
            send(
                handle,
                Message::Reject(
                    Reject::new("tx", RejectReason::Invalid, "invalid transaction")
                        .with_data(hash.0),
                ),
            );
            adjust(handle, Behaviour::InvalidTx)
        }
    }
}

async fn handle_get_headers(
    ctx: &ConnectionContext,
    handle: &PeerHandle,
    locator: BlockLocator,
) {
    let chain = ctx.chain.read().await;
    let mut headers = Vec::new();
    if let Ok(Some(start_height)) = chain.store().main_chain_height(&locator.start) {
        let mut height = start_height.next();
        while headers.len() < MAX_HEADERS_RESPONSE {
            let hash = match chain.store().main_chain_hash(height) {
                Ok(Some(hash)) => hash,
                _ => break,
            };
            let block = match chain.block(&hash) {
                Ok(Some(block)) => block,
                _ => break,
            };
            headers.push(CountedHeader {
                header: block.header.clone(),
                transaction_count: block.transactions.len(),
            });
            if locator.stop == Some(hash) {
                break;
            }
            height = height.next();
        }
    }
    send(handle, Message::Headers(headers));
}

async fn handle_get_blocks(ctx: &ConnectionContext, handle: &PeerHandle, locator: BlockLocator) {
    let chain = ctx.chain.read().await;
    let mut hashes = Vec::new();
    if let Ok(Some(start_height)) = chain.store().main_chain_height(&locator.start) {
        let mut height = start_height.next();
        while hashes.len() < MAX_BLOCK_INV_RESPONSE {
            let hash = match chain.store().main_chain_hash(height) {
                Ok(Some(hash)) => hash,
                _ => break,
            };
            hashes.push(hash);
            if locator.stop == Some(hash) {
                break;
            }
            height = height.next();
        }
    }
    if !hashes.is_empty() {
        send(handle, Message::Inv(Inventory::blocks(hashes)));
    }
}

fn handle_headers(ctx: &ConnectionContext, handle: &PeerHandle, headers: Vec<CountedHeader>) {
    // Headers-first relay: fetch the bodies we lack.
    let unknown: Vec<block::Hash> = headers
        .iter()
        .map(|counted| counted.header.hash())
        .filter(|hash| !ctx.peers.block_is_known(hash))
        .collect();
    if !unknown.is_empty() {
        send(handle, Message::GetData(Inventory::blocks(unknown)));
    }
}

async fn handle_get_block_txn(
    ctx: &ConnectionContext,
    handle: &PeerHandle,
    request: GetBlockTxn,
) {
    let chain = ctx.chain.read().await;
    match chain.block(&request.block_hash) {
        Ok(Some(block)) => {
            let transactions: Vec<Transaction> = request
                .indexes
                .iter()
                .filter_map(|&index| block.transactions.get(index as usize))
                .map(|tx| (**tx).clone())
                .collect();
            send(
                handle,
                Message::BlockTxn(BlockTxn {
                    block_hash: request.block_hash,
                    transactions,
                }),
            );
        }
        _ => send(
            handle,
            Message::NotFound(Inventory::blocks(std::iter::once(request.block_hash))),
        ),
    }
}
