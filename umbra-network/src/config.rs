//! Network configuration.

use std::net::SocketAddr;

use umbra_chain::parameters::Network;

/// Configuration for the sync engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// The network to join (selects magic and consensus parameters).
    pub network: Network,
    /// The address the inbound listener binds.
    pub listen_addr: SocketAddr,
    /// Peers dialed at startup and redialed when the peer count drops to
    /// zero.
    pub initial_peers: Vec<SocketAddr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            network: Network::Mainnet,
            listen_addr: "0.0.0.0:8655"
                .parse()
                .expect("hard-coded listen address parses"),
            initial_peers: Vec::new(),
        }
    }
}
