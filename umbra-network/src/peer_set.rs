//! The connection registry: live peers, the ban list, address gossip, and
//! the advisory known-inventory caches shared by every peer task.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use umbra_chain::{block, transaction};

use crate::constants::{KNOWN_INVENTORY_CAP, MAX_ADDRS_RESPONSE};
use crate::peer::Peer;
use crate::protocol::message::Message;

/// A registered connection: the peer state plus the channel its writer
/// task drains.
#[derive(Clone)]
pub struct PeerHandle {
    pub peer: Arc<Mutex<Peer>>,
    pub sender: mpsc::Sender<Message>,
}

/// A bounded insertion-ordered hash cache. Advisory only: a miss causes
/// extra work, never a correctness failure.
struct KnownCache {
    set: HashSet<[u8; 32]>,
    order: VecDeque<[u8; 32]>,
}

impl KnownCache {
    fn new() -> KnownCache {
        KnownCache {
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, hash: [u8; 32]) {
        if !self.set.insert(hash) {
            return;
        }
        self.order.push_back(hash);
        if self.order.len() > KNOWN_INVENTORY_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }

    fn contains(&self, hash: &[u8; 32]) -> bool {
        self.set.contains(hash)
    }
}

/// Shared state across all peer tasks.
pub struct PeerSet {
    peers: RwLock<HashMap<SocketAddr, PeerHandle>>,
    banned: RwLock<HashMap<IpAddr, Instant>>,
    known_blocks: RwLock<KnownCache>,
    known_txs: RwLock<KnownCache>,
    known_addrs: RwLock<HashSet<String>>,
}

impl Default for PeerSet {
    fn default() -> Self {
        PeerSet::new()
    }
}

impl PeerSet {
    pub fn new() -> PeerSet {
        PeerSet {
            peers: RwLock::new(HashMap::new()),
            banned: RwLock::new(HashMap::new()),
            known_blocks: RwLock::new(KnownCache::new()),
            known_txs: RwLock::new(KnownCache::new()),
            known_addrs: RwLock::new(HashSet::new()),
        }
    }

    pub fn register(&self, handle: PeerHandle) {
        let addr = handle.peer.lock().expect("peer lock poisoned").addr;
        self.peers
            .write()
            .expect("peer set lock poisoned")
            .insert(addr, handle);
        metrics::gauge!("network.peers").set(self.peer_count() as f64);
    }

    pub fn deregister(&self, addr: &SocketAddr) {
        self.peers
            .write()
            .expect("peer set lock poisoned")
            .remove(addr);
        metrics::gauge!("network.peers").set(self.peer_count() as f64);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().expect("peer set lock poisoned").len()
    }

    pub fn inbound_count(&self) -> usize {
        self.peers
            .read()
            .expect("peer set lock poisoned")
            .values()
            .filter(|handle| handle.peer.lock().expect("peer lock poisoned").inbound)
            .count()
    }

    pub fn outbound_count(&self) -> usize {
        self.peer_count() - self.inbound_count()
    }

    /// Ban `ip` until `until`; the address is refused before handshake.
    pub fn ban(&self, ip: IpAddr, until: Instant) {
        warn!(%ip, "banning peer address");
        self.banned
            .write()
            .expect("ban list lock poisoned")
            .insert(ip, until);
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        match self.banned.read().expect("ban list lock poisoned").get(ip) {
            Some(until) => *until > Instant::now(),
            None => false,
        }
    }

    /// Drop expired ban entries.
    pub fn expire_bans(&self) {
        let now = Instant::now();
        self.banned
            .write()
            .expect("ban list lock poisoned")
            .retain(|_, until| *until > now);
    }

    /// Run `f` over every connected peer's state (score decay etc.).
    pub fn for_each_peer<F: FnMut(&mut Peer)>(&self, mut f: F) {
        for handle in self.peers.read().expect("peer set lock poisoned").values() {
            f(&mut handle.peer.lock().expect("peer lock poisoned"));
        }
    }

    pub fn mark_block_known(&self, hash: &block::Hash) {
        self.known_blocks
            .write()
            .expect("known cache lock poisoned")
            .insert(hash.0);
    }

    pub fn block_is_known(&self, hash: &block::Hash) -> bool {
        self.known_blocks
            .read()
            .expect("known cache lock poisoned")
            .contains(&hash.0)
    }

    pub fn mark_tx_known(&self, hash: &transaction::Hash) {
        self.known_txs
            .write()
            .expect("known cache lock poisoned")
            .insert(hash.0);
    }

    pub fn tx_is_known(&self, hash: &transaction::Hash) -> bool {
        self.known_txs
            .read()
            .expect("known cache lock poisoned")
            .contains(&hash.0)
    }

    pub fn add_known_addr(&self, addr: String) {
        self.known_addrs
            .write()
            .expect("addr book lock poisoned")
            .insert(addr);
    }

    pub fn known_addrs(&self) -> Vec<String> {
        self.known_addrs
            .read()
            .expect("addr book lock poisoned")
            .iter()
            .take(MAX_ADDRS_RESPONSE)
            .cloned()
            .collect()
    }

    /// Queue `message` to every connected peer except `source`, subject to
    /// `filter` on the peer state.
    pub fn broadcast_filtered<F: Fn(&Peer) -> bool>(
        &self,
        message: Message,
        source: Option<SocketAddr>,
        filter: F,
    ) {
        let handles: Vec<PeerHandle> = self
            .peers
            .read()
            .expect("peer set lock poisoned")
            .values()
            .cloned()
            .collect();
        for handle in handles {
            let (addr, passes) = {
                let peer = handle.peer.lock().expect("peer lock poisoned");
                (peer.addr, filter(&peer))
            };
            if Some(addr) == source || !passes {
                continue;
            }
            if handle.sender.try_send(message.clone()).is_err() {
                debug!(%addr, "peer send queue full; dropping broadcast");
            }
        }
    }

    /// Queue `message` to every connected peer except `source`.
    pub fn broadcast(&self, message: Message, source: Option<SocketAddr>) {
        self.broadcast_filtered(message, source, |_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn bans_expire() {
        let set = PeerSet::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        set.ban(ip, Instant::now() + Duration::from_millis(50));
        assert!(set.is_banned(&ip));
        std::thread::sleep(Duration::from_millis(60));
        assert!(!set.is_banned(&ip));
        set.expire_bans();
        assert!(set
            .banned
            .read()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn known_cache_is_bounded() {
        let set = PeerSet::new();
        for i in 0..(KNOWN_INVENTORY_CAP + 10) {
            let mut hash = [0u8; 32];
            hash[..8].copy_from_slice(&(i as u64).to_le_bytes());
            set.mark_block_known(&block::Hash(hash));
        }
        let cache = set.known_blocks.read().unwrap();
        assert_eq!(cache.order.len(), KNOWN_INVENTORY_CAP);
        assert_eq!(cache.set.len(), KNOWN_INVENTORY_CAP);
        // The earliest entry was evicted.
        assert!(!cache.contains(&[0u8; 32]));
    }

    #[test]
    fn counts_distinguish_directions() {
        let set = PeerSet::new();
        let (tx_a, _rx_a) = mpsc::channel(1);
        let (tx_b, _rx_b) = mpsc::channel(1);
        set.register(PeerHandle {
            peer: Arc::new(Mutex::new(Peer::new("10.0.0.1:1".parse().unwrap(), true))),
            sender: tx_a,
        });
        set.register(PeerHandle {
            peer: Arc::new(Mutex::new(Peer::new("10.0.0.2:1".parse().unwrap(), false))),
            sender: tx_b,
        });
        assert_eq!(set.peer_count(), 2);
        assert_eq!(set.inbound_count(), 1);
        assert_eq!(set.outbound_count(), 1);
        set.deregister(&"10.0.0.1:1".parse().unwrap());
        assert_eq!(set.inbound_count(), 0);
    }
}
