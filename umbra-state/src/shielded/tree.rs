//! An incremental Merkle tree over note commitments.
//!
//! Fixed depth, append-only, O(depth) storage: the classic frontier
//! construction. The tree hash is blake2b-256 with a domain-separating
//! personalization, so commitment-tree nodes can never collide with other
//! hashes in the system.

use lazy_static::lazy_static;
use umbra_chain::shielded::Commitment;

/// The depth of the note commitment tree; capacity is 2^32 notes.
pub const TREE_DEPTH: usize = 32;

const PERSONALIZATION: &[u8; 16] = b"UmbraNoteCmTree_";

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut state = blake2b_simd::Params::new()
        .hash_length(32)
        .personal(PERSONALIZATION)
        .to_state();
    state.update(left);
    state.update(right);
    let mut out = [0u8; 32];
    out.copy_from_slice(state.finalize().as_bytes());
    out
}

lazy_static! {
    /// `EMPTY_ROOTS[d]` is the root of an empty subtree of depth `d`.
    static ref EMPTY_ROOTS: Vec<[u8; 32]> = {
        let mut roots = Vec::with_capacity(TREE_DEPTH + 1);
        roots.push([0u8; 32]);
        for depth in 0..TREE_DEPTH {
            let below = roots[depth];
            roots.push(hash_pair(&below, &below));
        }
        roots
    };
}

/// The append-only commitment tree frontier.
#[derive(Clone, Debug)]
pub struct NoteCommitmentTree {
    /// `branch[d]` holds the left sibling pending at depth `d`, when the
    /// leaf count has an odd subtree at that depth.
    branch: [[u8; 32]; TREE_DEPTH],
    leaf_count: u64,
}

impl Default for NoteCommitmentTree {
    fn default() -> Self {
        NoteCommitmentTree::new()
    }
}

impl NoteCommitmentTree {
    pub fn new() -> NoteCommitmentTree {
        NoteCommitmentTree {
            branch: [[0u8; 32]; TREE_DEPTH],
            leaf_count: 0,
        }
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// Append a commitment as the next leaf.
    ///
    /// Panics if the tree is full, which cannot happen before 2^32 notes.
    pub fn append(&mut self, commitment: Commitment) {
        assert!(
            self.leaf_count < 1u64 << TREE_DEPTH,
            "note commitment tree overflow"
        );
        let mut node = commitment.0;
        let mut size = self.leaf_count + 1;
        for depth in 0..TREE_DEPTH {
            if size & 1 == 1 {
                self.branch[depth] = node;
                break;
            }
            node = hash_pair(&self.branch[depth], &node);
            size >>= 1;
        }
        self.leaf_count += 1;
    }

    /// The current root over all appended leaves, padding with empty
    /// subtrees on the right.
    pub fn root(&self) -> [u8; 32] {
        let mut node = [0u8; 32];
        let mut size = self.leaf_count;
        for depth in 0..TREE_DEPTH {
            node = if size & 1 == 1 {
                hash_pair(&self.branch[depth], &node)
            } else {
                hash_pair(&node, &EMPTY_ROOTS[depth])
            };
            size >>= 1;
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_root(leaves: &[[u8; 32]]) -> [u8; 32] {
        let mut level: Vec<[u8; 32]> = leaves.to_vec();
        for depth in 0..TREE_DEPTH {
            while level.len() % 2 != 0 || level.is_empty() {
                level.push(EMPTY_ROOTS[depth]);
            }
            level = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
        }
        level[0]
    }

    #[test]
    fn empty_root_matches_naive_construction() {
        let tree = NoteCommitmentTree::new();
        assert_eq!(tree.root(), naive_root(&[]));
        assert_eq!(tree.root(), EMPTY_ROOTS[TREE_DEPTH]);
    }

    #[test]
    fn incremental_roots_match_naive_construction() {
        let mut tree = NoteCommitmentTree::new();
        let mut leaves = Vec::new();
        for i in 1u8..=7 {
            tree.append(Commitment([i; 32]));
            leaves.push([i; 32]);
            assert_eq!(tree.root(), naive_root(&leaves), "mismatch at {} leaves", i);
        }
    }

    #[test]
    fn roots_change_with_every_append() {
        let mut tree = NoteCommitmentTree::new();
        let mut seen = std::collections::HashSet::new();
        seen.insert(tree.root());
        for i in 0u8..10 {
            tree.append(Commitment([i; 32]));
            assert!(seen.insert(tree.root()), "root repeated after append");
        }
    }
}
