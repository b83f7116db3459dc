//! Genesis blocks for each Umbra network.

use chrono::{TimeZone, Utc};
use lazy_static::lazy_static;
use std::sync::Arc;

use crate::block::{self, merkle};
use crate::parameters::{Network, NetworkParameters};
use crate::transaction::{Memo, Transaction, TxType};
use crate::transparent::{Input, OutPoint, Output, Script};

/// The previous block hash for the genesis block: the all-zero sentinel.
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash([0; 32]);

fn build_genesis(network: Network, tagline: &str, time_secs: i64) -> block::Block {
    let params = NetworkParameters::for_network(network);
    let coinbase = Transaction::new(
        1,
        TxType::Transparent,
        vec![Input {
            previous_outpoint: OutPoint::coinbase_sentinel(),
            signature_script: Script(tagline.as_bytes().to_vec()),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: params.base_subsidy,
            // The genesis output is unspendable: its lock script is OP_RETURN.
            pk_script: Script(vec![0x6a]),
        }],
        0,
        Memo::empty(),
    );

    let merkle_root: merkle::Root = std::iter::once(coinbase.hash()).collect();
    let header = block::Header::new(
        1,
        GENESIS_PREVIOUS_BLOCK_HASH,
        merkle_root,
        Utc.timestamp_opt(time_secs, 0)
            .single()
            .expect("genesis timestamp is in range"),
        params.pow_limit,
        0,
        Vec::new(),
    );

    block::Block {
        header,
        transactions: vec![Arc::new(coinbase)],
    }
}

lazy_static! {
    static ref MAINNET_GENESIS: block::Block = build_genesis(
        Network::Mainnet,
        "umbra genesis: the quiet ledger begins",
        1_713_000_000,
    );
    static ref TESTNET_GENESIS: block::Block = build_genesis(
        Network::Testnet,
        "umbra testnet genesis",
        1_713_000_000,
    );
}

/// Returns the genesis block for `network`.
pub fn genesis_block(network: Network) -> block::Block {
    match network {
        Network::Mainnet => MAINNET_GENESIS.clone(),
        Network::Testnet => TESTNET_GENESIS.clone(),
    }
}

/// Returns the hash of the genesis block for `network`.
pub fn genesis_hash(network: Network) -> block::Hash {
    genesis_block(network).hash()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_well_formed() {
        for &network in &[Network::Mainnet, Network::Testnet] {
            let genesis = genesis_block(network);
            assert_eq!(genesis.header.previous_block_hash, GENESIS_PREVIOUS_BLOCK_HASH);
            assert_eq!(genesis.transactions.len(), 1);
            assert!(genesis.transactions[0].is_coinbase());

            let expected_root: merkle::Root =
                std::iter::once(genesis.transactions[0].hash()).collect();
            assert_eq!(genesis.header.merkle_root, expected_root);
        }
    }

    #[test]
    fn networks_have_distinct_genesis_hashes() {
        assert_ne!(genesis_hash(Network::Mainnet), genesis_hash(Network::Testnet));
    }

    #[test]
    fn genesis_hash_is_stable() {
        assert_eq!(genesis_hash(Network::Mainnet), genesis_hash(Network::Mainnet));
    }
}
