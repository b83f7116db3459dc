//! The proof-of-work engine interface.
//!
//! The chain only consumes `verify` and `solve_with_limit`; the concrete
//! algorithm is injected from outside, so alternate engines (including the
//! hybrid cipher construction used by pool miners) can be plugged in without
//! touching consensus code.

use umbra_chain::block::Header;
use umbra_chain::work::difficulty::ExpandedDifficulty;

/// The result of a bounded solve attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Solution {
    pub nonce: u32,
    pub solution: Vec<u8>,
    pub found: bool,
}

/// A pluggable proof-of-work engine.
pub trait PowEngine: Send + Sync {
    /// Deterministic predicate over the header bytes.
    fn verify(&self, header: &Header) -> bool;

    /// Search for a valid nonce, giving up after `max_iterations` attempts.
    fn solve_with_limit(&self, header: &Header, max_iterations: u64) -> Solution;
}

/// The reference engine: the canonical double-SHA256 header hash must not
/// exceed the expanded compact target. The solution byte string is carried
/// opaquely.
pub struct Sha256dPow;

impl PowEngine for Sha256dPow {
    fn verify(&self, header: &Header) -> bool {
        let target = match header.difficulty_threshold.to_expanded() {
            Some(target) => target,
            None => return false,
        };
        ExpandedDifficulty::from(&header.hash()) <= target
    }

    fn solve_with_limit(&self, header: &Header, max_iterations: u64) -> Solution {
        let mut candidate = header.clone();
        for attempt in 0..max_iterations {
            candidate = Header::new(
                header.version,
                header.previous_block_hash,
                header.merkle_root,
                header.time,
                header.difficulty_threshold,
                header.nonce.wrapping_add(attempt as u32),
                header.solution.clone(),
            );
            if self.verify(&candidate) {
                return Solution {
                    nonce: candidate.nonce,
                    solution: candidate.solution,
                    found: true,
                };
            }
        }
        Solution {
            nonce: candidate.nonce,
            solution: Vec::new(),
            found: false,
        }
    }
}

/// A test engine that accepts every header. Useful wherever PoW grinding
/// would only slow the suite down.
pub struct AlwaysValidPow;

impl PowEngine for AlwaysValidPow {
    fn verify(&self, _header: &Header) -> bool {
        true
    }

    fn solve_with_limit(&self, header: &Header, _max_iterations: u64) -> Solution {
        Solution {
            nonce: header.nonce,
            solution: header.solution.clone(),
            found: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use umbra_chain::block::{merkle, Hash};
    use umbra_chain::work::difficulty::CompactDifficulty;

    fn easy_header() -> Header {
        Header::new(
            1,
            Hash([1; 32]),
            merkle::Root([2; 32]),
            Utc.timestamp_opt(1_713_000_000, 0).single().unwrap(),
            // The easiest expressible target: almost every hash passes.
            CompactDifficulty(0x207fffff),
            0,
            vec![],
        )
    }

    #[test]
    fn solve_then_verify_roundtrip() {
        let engine = Sha256dPow;
        let header = easy_header();
        let solution = engine.solve_with_limit(&header, 10_000);
        assert!(solution.found);

        let solved = Header::new(
            header.version,
            header.previous_block_hash,
            header.merkle_root,
            header.time,
            header.difficulty_threshold,
            solution.nonce,
            solution.solution,
        );
        assert!(engine.verify(&solved));
    }

    #[test]
    fn hard_target_fails_within_a_small_budget() {
        let engine = Sha256dPow;
        let mut header = easy_header();
        // A one-in-2^220 target will not fall in 4 attempts.
        header.difficulty_threshold = CompactDifficulty(0x04ffffff);
        let solution = engine.solve_with_limit(&header, 4);
        assert!(!solution.found);
    }
}
