//! Block and chain-index storage.
//!
//! Trees:
//!   - `blocks`:          block hash → serialized block
//!   - `hash_by_height`:  big-endian height → block hash (main chain only)
//!   - `height_by_hash`:  block hash → big-endian height (main chain only)
//!   - `meta`:            the `tip` key → best block hash
//!
//! `hash_by_height` keys are big-endian so sled's lexicographic iteration
//! order is numeric height order.

use std::path::PathBuf;

use umbra_chain::block::{self, Block};
use umbra_chain::{WireDeserialize, WireSerialize};

use crate::StateError;

const TIP_KEY: &[u8] = b"tip";

/// Where to put the database.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// The database directory. `None` selects a temporary database that is
    /// removed on drop, for tests and ephemeral nodes.
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    pub fn ephemeral() -> Config {
        Config { cache_dir: None }
    }

    fn sled_config(&self) -> sled::Config {
        match &self.cache_dir {
            Some(path) => sled::Config::new().path(path),
            None => sled::Config::new().temporary(true),
        }
    }
}

/// The block store and main-chain index.
pub struct Store {
    db: sled::Db,
    blocks: sled::Tree,
    hash_by_height: sled::Tree,
    height_by_hash: sled::Tree,
    meta: sled::Tree,
}

pub(crate) fn height_key(height: block::Height) -> [u8; 4] {
    height.0.to_be_bytes()
}

fn decode_height(bytes: &[u8]) -> Result<block::Height, StateError> {
    if bytes.len() != 4 {
        return Err(StateError::Corrupt("height entry must be 4 bytes"));
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Ok(block::Height(u32::from_be_bytes(buf)))
}

fn decode_hash(bytes: &[u8]) -> Result<block::Hash, StateError> {
    if bytes.len() != 32 {
        return Err(StateError::Corrupt("hash entry must be 32 bytes"));
    }
    let mut buf = [0u8; 32];
    buf.copy_from_slice(bytes);
    Ok(block::Hash(buf))
}

impl Store {
    pub fn new(config: &Config) -> Result<Store, StateError> {
        let db = config.sled_config().open()?;
        Ok(Store {
            blocks: db.open_tree(b"blocks")?,
            hash_by_height: db.open_tree(b"hash_by_height")?,
            height_by_hash: db.open_tree(b"height_by_hash")?,
            meta: db.open_tree(b"meta")?,
            db,
        })
    }

    /// Open an additional named tree in the same database, for the engines
    /// layered on top of this store.
    pub(crate) fn open_tree(&self, name: &[u8]) -> Result<sled::Tree, StateError> {
        Ok(self.db.open_tree(name)?)
    }

    /// Save a block body keyed by its hash. Does not touch the main-chain
    /// index: side-chain blocks are stored too.
    pub fn insert_block(&self, block: &Block) -> Result<block::Hash, StateError> {
        let hash = block.hash();
        let bytes = block
            .wire_serialize_to_vec()
            .map_err(|_| StateError::Corrupt("block failed to serialize"))?;
        self.blocks.insert(&hash.0, bytes)?;
        Ok(hash)
    }

    pub fn contains_block(&self, hash: &block::Hash) -> Result<bool, StateError> {
        Ok(self.blocks.contains_key(&hash.0)?)
    }

    pub fn block(&self, hash: &block::Hash) -> Result<Option<Block>, StateError> {
        match self.blocks.get(&hash.0)? {
            Some(bytes) => {
                let block = Block::wire_deserialize(&bytes[..])
                    .map_err(|_| StateError::Corrupt("stored block failed to decode"))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Add `hash` to the main chain at `height` and advance the tip.
    pub fn connect_to_main_chain(
        &self,
        hash: block::Hash,
        height: block::Height,
    ) -> Result<(), StateError> {
        self.hash_by_height.insert(&height_key(height), &hash.0[..])?;
        self.height_by_hash.insert(&hash.0, &height_key(height)[..])?;
        self.meta.insert(TIP_KEY, &hash.0[..])?;
        metrics::gauge!("state.tip.height").set(f64::from(height.0));
        Ok(())
    }

    /// Remove the main-chain entry for `hash` and move the tip to its
    /// parent.
    pub fn disconnect_from_main_chain(
        &self,
        hash: block::Hash,
        parent: block::Hash,
    ) -> Result<(), StateError> {
        if let Some(height_bytes) = self.height_by_hash.remove(&hash.0)? {
            self.hash_by_height.remove(&height_bytes)?;
        }
        self.meta.insert(TIP_KEY, &parent.0[..])?;
        Ok(())
    }

    /// The height of `hash` on the main chain, if it is on the main chain.
    pub fn main_chain_height(&self, hash: &block::Hash) -> Result<Option<block::Height>, StateError> {
        match self.height_by_hash.get(&hash.0)? {
            Some(bytes) => Ok(Some(decode_height(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn main_chain_hash(
        &self,
        height: block::Height,
    ) -> Result<Option<block::Hash>, StateError> {
        match self.hash_by_height.get(&height_key(height))? {
            Some(bytes) => Ok(Some(decode_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The current tip, or `None` before genesis is committed.
    pub fn tip(&self) -> Result<Option<(block::Height, block::Hash)>, StateError> {
        let hash = match self.meta.get(TIP_KEY)? {
            Some(bytes) => decode_hash(&bytes)?,
            None => return Ok(None),
        };
        let height = self
            .main_chain_height(&hash)?
            .ok_or(StateError::Corrupt("tip hash missing from chain index"))?;
        Ok(Some((height, hash)))
    }

    /// Build a block locator: recent hashes, then exponentially sparser
    /// ones, ending at genesis.
    pub fn block_locator(&self) -> Result<Vec<block::Hash>, StateError> {
        let (tip_height, _) = match self.tip()? {
            Some(tip) => tip,
            None => return Ok(Vec::new()),
        };

        let mut hashes = Vec::new();
        let mut step = 1u32;
        let mut height = tip_height.0 as i64;
        while height > 0 {
            if let Some(hash) = self.main_chain_hash(block::Height(height as u32))? {
                hashes.push(hash);
            }
            if hashes.len() >= 10 {
                step = step.saturating_mul(2);
            }
            height -= i64::from(step);
        }
        if let Some(genesis) = self.main_chain_hash(block::Height(0))? {
            hashes.push(genesis);
        }
        Ok(hashes)
    }

    /// Flush dirty buffers to disk.
    pub fn flush(&self) -> Result<(), StateError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_chain::parameters::{genesis_block, Network};

    fn ephemeral_store() -> Store {
        Store::new(&Config::ephemeral()).expect("ephemeral store opens")
    }

    #[test]
    fn stored_blocks_are_keyed_by_their_hash() {
        let store = ephemeral_store();
        let genesis = genesis_block(Network::Mainnet);
        let hash = store.insert_block(&genesis).unwrap();
        assert_eq!(hash, genesis.hash());

        let loaded = store.block(&hash).unwrap().expect("block is present");
        assert_eq!(loaded.hash(), hash);
    }

    #[test]
    fn tip_tracks_connect_and_disconnect() {
        let store = ephemeral_store();
        let genesis = genesis_block(Network::Mainnet);
        let genesis_hash = store.insert_block(&genesis).unwrap();

        assert!(store.tip().unwrap().is_none());
        store
            .connect_to_main_chain(genesis_hash, block::Height(0))
            .unwrap();
        assert_eq!(
            store.tip().unwrap(),
            Some((block::Height(0), genesis_hash))
        );

        let child_hash = block::Hash([7; 32]);
        store
            .connect_to_main_chain(child_hash, block::Height(1))
            .unwrap();
        assert_eq!(store.tip().unwrap(), Some((block::Height(1), child_hash)));

        store
            .disconnect_from_main_chain(child_hash, genesis_hash)
            .unwrap();
        assert_eq!(
            store.tip().unwrap(),
            Some((block::Height(0), genesis_hash))
        );
        assert!(store.main_chain_height(&child_hash).unwrap().is_none());
    }

    #[test]
    fn locator_starts_at_tip_and_ends_at_genesis() {
        let store = ephemeral_store();
        let mut hashes = Vec::new();
        for height in 0u32..30 {
            let hash = block::Hash([height as u8; 32]);
            hashes.push(hash);
            store
                .connect_to_main_chain(hash, block::Height(height))
                .unwrap();
        }
        let locator = store.block_locator().unwrap();
        assert_eq!(locator.first(), Some(&hashes[29]));
        assert_eq!(locator.last(), Some(&hashes[0]));
        // Sparser than one-hash-per-height.
        assert!(locator.len() < 30);
    }
}
