//! Fee estimation over a rolling window of recent blocks.

use std::collections::VecDeque;
use std::sync::RwLock;

use umbra_chain::block::Height;

/// How many recent blocks feed the estimate.
pub const WINDOW_BLOCKS: usize = 100;
/// The rate assumed when the window is empty, satoshis per KB.
pub const DEFAULT_FEE_PER_KB: i64 = 1_000;
/// No estimate goes below this absolute fee, in satoshis.
pub const MIN_ESTIMATED_FEE: i64 = 10_000;

/// Per-block fee statistics.
#[derive(Clone, Debug, Default)]
pub struct BlockFeeStats {
    pub height: u32,
    pub total_fees: i64,
    pub total_size: usize,
    pub tx_count: usize,
    pub min_fee: i64,
    pub median_fee: i64,
    pub max_fee: i64,
}

impl BlockFeeStats {
    /// Summarize one block from its per-transaction (fee, size) pairs,
    /// coinbase excluded.
    pub fn from_block(height: Height, fees_and_sizes: &[(i64, usize)]) -> BlockFeeStats {
        let mut fees: Vec<i64> = fees_and_sizes.iter().map(|(fee, _)| *fee).collect();
        fees.sort_unstable();
        let median_fee = if fees.is_empty() {
            0
        } else {
            fees[fees.len() / 2]
        };
        BlockFeeStats {
            height: height.0,
            total_fees: fees.iter().sum(),
            total_size: fees_and_sizes.iter().map(|(_, size)| *size).sum(),
            tx_count: fees.len(),
            min_fee: fees.first().copied().unwrap_or(0),
            median_fee,
            max_fee: fees.last().copied().unwrap_or(0),
        }
    }

    fn fee_per_kb(&self) -> Option<i64> {
        if self.total_size == 0 {
            return None;
        }
        Some(self.total_fees.saturating_mul(1000) / self.total_size as i64)
    }
}

/// The rolling fee-statistics window.
pub struct FeeEstimator {
    window: RwLock<VecDeque<BlockFeeStats>>,
}

impl Default for FeeEstimator {
    fn default() -> Self {
        FeeEstimator::new()
    }
}

impl FeeEstimator {
    pub fn new() -> FeeEstimator {
        FeeEstimator {
            window: RwLock::new(VecDeque::with_capacity(WINDOW_BLOCKS)),
        }
    }

    /// Append a block's stats, evicting the oldest past the window.
    pub fn add_block(&self, stats: BlockFeeStats) {
        let mut window = self.window.write().expect("estimator lock poisoned");
        if window.len() == WINDOW_BLOCKS {
            window.pop_front();
        }
        window.push_back(stats);
    }

    /// Drop the most recent block's stats (used on disconnect).
    pub fn pop_block(&self) {
        let mut window = self.window.write().expect("estimator lock poisoned");
        window.pop_back();
    }

    pub fn window_len(&self) -> usize {
        self.window.read().expect("estimator lock poisoned").len()
    }

    /// The priority multiplier for a confirmation target in blocks.
    fn priority_factor(target_blocks: usize) -> f64 {
        match target_blocks {
            0 | 1 => 2.0,
            2..=3 => 1.5,
            4..=6 => 1.2,
            7..=12 => 1.0,
            _ => 0.8,
        }
    }

    /// Estimate the fee for a transaction of `tx_size` bytes aiming to
    /// confirm within `target_blocks`: the average fee-per-KB over the last
    /// `target_blocks` blocks, scaled by the priority factor, floored at
    /// [`MIN_ESTIMATED_FEE`].
    pub fn estimate_fee(&self, tx_size: usize, target_blocks: usize) -> i64 {
        let window = self.window.read().expect("estimator lock poisoned");
        let recent: Vec<i64> = window
            .iter()
            .rev()
            .take(target_blocks.max(1))
            .filter_map(BlockFeeStats::fee_per_kb)
            .collect();

        let rate = if recent.is_empty() {
            DEFAULT_FEE_PER_KB
        } else {
            recent.iter().sum::<i64>() / recent.len() as i64
        };

        let factor = FeeEstimator::priority_factor(target_blocks);
        let fee = (rate as f64 * factor * tx_size as f64 / 1000.0) as i64;
        fee.max(MIN_ESTIMATED_FEE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(height: u32, total_fees: i64, total_size: usize) -> BlockFeeStats {
        BlockFeeStats {
            height,
            total_fees,
            total_size,
            tx_count: 1,
            min_fee: total_fees,
            median_fee: total_fees,
            max_fee: total_fees,
        }
    }

    #[test]
    fn empty_window_uses_the_floor_rate() {
        let estimator = FeeEstimator::new();
        // 1000 sat/KB * 2.0 * 250/1000 = 500, floored at 10_000.
        assert_eq!(estimator.estimate_fee(250, 1), MIN_ESTIMATED_FEE);
    }

    #[test]
    fn estimates_scale_with_observed_rates() {
        let estimator = FeeEstimator::new();
        // 1_000_000 sats over 10_000 bytes: 100_000 sat/KB.
        estimator.add_block(stats(1, 1_000_000, 10_000));

        // target 1: 100_000 * 2.0 * 1 = 200_000
        assert_eq!(estimator.estimate_fee(1000, 1), 200_000);
        // target 8: factor 1.0
        assert_eq!(estimator.estimate_fee(1000, 8), 100_000);
        // target 20: factor 0.8
        assert_eq!(estimator.estimate_fee(1000, 20), 80_000);
    }

    #[test]
    fn averaging_covers_only_the_requested_depth() {
        let estimator = FeeEstimator::new();
        estimator.add_block(stats(1, 1_000_000, 10_000)); // 100_000 sat/KB, older
        estimator.add_block(stats(2, 200_000, 10_000)); // 20_000 sat/KB, newest

        // target 1 sees only the newest block: 20_000 * 2.0 = 40_000.
        assert_eq!(estimator.estimate_fee(1000, 1), 40_000);
        // target 2 averages both: 60_000 * 1.5 = 90_000.
        assert_eq!(estimator.estimate_fee(1000, 2), 90_000);
    }

    #[test]
    fn window_evicts_the_oldest_block() {
        let estimator = FeeEstimator::new();
        for height in 0..(WINDOW_BLOCKS as u32 + 10) {
            estimator.add_block(stats(height, 1000, 1000));
        }
        assert_eq!(estimator.window_len(), WINDOW_BLOCKS);
    }

    #[test]
    fn median_is_computed_from_sorted_fees() {
        let stats = BlockFeeStats::from_block(
            Height(5),
            &[(300, 100), (100, 100), (200, 100)],
        );
        assert_eq!(stats.min_fee, 100);
        assert_eq!(stats.median_fee, 200);
        assert_eq!(stats.max_fee, 300);
        assert_eq!(stats.total_fees, 600);
        assert_eq!(stats.total_size, 300);
    }
}
