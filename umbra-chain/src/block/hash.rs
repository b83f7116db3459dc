use crate::serialization::sha256d::{self, impl_digest_conventions};
use crate::serialization::WireSerialize;
#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

use super::Header;

/// A hash of a block, used to identify blocks and link blocks into a chain.
///
/// Technically, this is the sha256d hash of a block *header*, but since the
/// header commits to the Merkle root of the transactions, it binds the
/// entire contents of the block.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash(pub [u8; 32]);

impl_digest_conventions!(Hash, "block::Hash");

impl Hash {
    /// The all-zero hash, used as the genesis parent and as the open-ended
    /// stop sentinel in locator messages.
    pub const fn zero() -> Hash {
        Hash([0; 32])
    }

    pub fn from_bytes_exact(bytes: [u8; 32]) -> Hash {
        Hash(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }
}

impl<'a> From<&'a Header> for Hash {
    fn from(header: &'a Header) -> Self {
        // Deserialized headers carry their hash from the raw bytes; only
        // locally built headers pay for a serialization here.
        if let Some(hash) = header.precomputed_hash() {
            return hash;
        }
        let mut hash_writer = sha256d::Writer::default();
        header
            .wire_serialize(&mut hash_writer)
            .expect("sha256d::Writer is infallible");
        Self(hash_writer.finish())
    }
}
