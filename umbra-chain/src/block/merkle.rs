//! The Bitcoin-inherited transaction Merkle tree.

use std::io;
use std::iter::FromIterator;

use crate::serialization::{sha256d, SerializationError, WireDeserialize, WireSerialize};
use crate::transaction;

/// The root of the transaction Merkle tree.
///
/// Note that because of a flaw in the original Bitcoin design
/// (CVE-2012-2459), the root does not always precisely bind the contents of
/// the block: the last element of an odd level is paired with itself.
/// Duplicate-transaction detection lives in consensus checks.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Root(pub [u8; 32]);

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl WireSerialize for Root {
    fn wire_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        target.write_all(&self.0)
    }
}

impl WireDeserialize for Root {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::wire_deserialize(&mut reader)?))
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut concat = [0u8; 64];
    concat[..32].copy_from_slice(left);
    concat[32..].copy_from_slice(right);
    sha256d::digest(&concat)
}

impl FromIterator<transaction::Hash> for Root {
    fn from_iter<I: IntoIterator<Item = transaction::Hash>>(hashes: I) -> Self {
        let mut level: Vec<[u8; 32]> = hashes.into_iter().map(|hash| hash.0).collect();
        if level.is_empty() {
            return Root([0; 32]);
        }
        while level.len() > 1 {
            // An odd element pairs with itself.
            if level.len() % 2 != 0 {
                let last = *level.last().expect("level is non-empty");
                level.push(last);
            }
            level = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
        }
        Root(level[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_hash_is_its_own_root() {
        let tx = transaction::Hash([7; 32]);
        let root: Root = std::iter::once(tx).collect();
        assert_eq!(root.0, tx.0);
    }

    #[test]
    fn odd_levels_pair_the_last_element_with_itself() {
        let txs = [
            transaction::Hash([1; 32]),
            transaction::Hash([2; 32]),
            transaction::Hash([3; 32]),
        ];
        let root: Root = txs.iter().cloned().collect();

        let left = hash_pair(&[1; 32], &[2; 32]);
        let right = hash_pair(&[3; 32], &[3; 32]);
        assert_eq!(root.0, hash_pair(&left, &right));
    }
}
