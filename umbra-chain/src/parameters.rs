//! Consensus parameters for each Umbra network.
//!
//! Everything height-, size-, or schedule-dependent in validation reads from
//! [`NetworkParameters`]; consensus code never hardcodes these values.

mod genesis;

pub use genesis::{genesis_block, genesis_hash, GENESIS_PREVIOUS_BLOCK_HASH};

use crate::block;
use crate::work::difficulty::CompactDifficulty;
use chrono::Duration;
use std::collections::BTreeMap;

/// An Umbra network: either the production chain or the test chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The test network.
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

/// The network magic bytes leading every framed message.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Magic(pub [u8; 4]);

impl std::fmt::Debug for Magic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Magic").field(&hex::encode(self.0)).finish()
    }
}

impl From<Network> for Magic {
    fn from(network: Network) -> Magic {
        match network {
            Network::Mainnet => Magic([0x55, 0x4d, 0x42, 0x52]),
            Network::Testnet => Magic([0x75, 0x6d, 0x62, 0x72]),
        }
    }
}

/// The consensus parameters of one Umbra network.
#[derive(Clone, Debug)]
pub struct NetworkParameters {
    pub network: Network,

    /// Target seconds between blocks (`T`).
    pub target_spacing_secs: i64,
    /// Blocks per difficulty retarget window (`N`).
    pub retarget_interval: u32,
    /// The clamp factor `F` applied to the observed retarget timespan.
    pub retarget_adjustment_factor: i64,
    /// The easiest permitted target.
    pub pow_limit: CompactDifficulty,
    /// Permit the PoW-limit target off retarget boundaries (test networks).
    pub min_difficulty_blocks: bool,

    /// Hard ceiling on a serialized block.
    pub max_block_bytes: u64,
    /// Acceptable clock skew for header timestamps, in both directions.
    pub max_time_drift: Duration,

    /// The block subsidy at height zero, in satoshis.
    pub base_subsidy: i64,
    /// Blocks between subsidy halvings.
    pub halving_interval: u32,

    /// Required block hashes at fixed heights.
    pub checkpoints: BTreeMap<block::Height, block::Hash>,

    /// Gas ceiling per contract transaction.
    pub max_tx_gas: u64,
    /// Minimum gas price a contract transaction may offer, in satoshis.
    pub min_gas_price: u64,

    /// Blocks between burned-fee redistribution payouts.
    pub burn_redistribution_interval: u32,
    /// Portion of burned value redistributed to miners, in percent.
    pub burn_redistribution_percent: u8,
}

impl NetworkParameters {
    pub fn mainnet() -> NetworkParameters {
        NetworkParameters {
            network: Network::Mainnet,
            target_spacing_secs: 60,
            retarget_interval: 1440,
            retarget_adjustment_factor: 4,
            pow_limit: CompactDifficulty(0x1d00ffff),
            min_difficulty_blocks: false,
            max_block_bytes: 3_200_000,
            max_time_drift: Duration::hours(24),
            base_subsidy: 2_500_000_000,
            halving_interval: 1_577_000,
            checkpoints: BTreeMap::new(),
            max_tx_gas: 10_000_000,
            min_gas_price: 1,
            burn_redistribution_interval: 10_000,
            burn_redistribution_percent: 50,
        }
    }

    pub fn testnet() -> NetworkParameters {
        NetworkParameters {
            network: Network::Testnet,
            min_difficulty_blocks: true,
            ..NetworkParameters::mainnet()
        }
    }

    pub fn for_network(network: Network) -> NetworkParameters {
        match network {
            Network::Mainnet => NetworkParameters::mainnet(),
            Network::Testnet => NetworkParameters::testnet(),
        }
    }

    /// The retarget window length in seconds (`T · N`).
    pub fn target_timespan_secs(&self) -> i64 {
        self.target_spacing_secs * i64::from(self.retarget_interval)
    }

    /// The required hash at `height`, when `height` is checkpointed.
    pub fn checkpoint(&self, height: block::Height) -> Option<block::Hash> {
        self.checkpoints.get(&height).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magics_differ_per_network() {
        assert_ne!(Magic::from(Network::Mainnet).0, Magic::from(Network::Testnet).0);
    }

    #[test]
    fn target_timespan_is_spacing_times_interval() {
        let params = NetworkParameters::mainnet();
        assert_eq!(
            params.target_timespan_secs(),
            params.target_spacing_secs * i64::from(params.retarget_interval)
        );
    }
}
