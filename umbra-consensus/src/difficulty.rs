//! The difficulty retarget rule.

use umbra_chain::block::{Header, Height};
use umbra_chain::parameters::NetworkParameters;
use umbra_chain::work::difficulty::{CompactDifficulty, ExpandedDifficulty};

use crate::error::BlockError;

/// Whether `height` starts a new retarget window.
pub fn is_retarget_height(height: Height, params: &NetworkParameters) -> bool {
    height.0 > 0 && height.0 % params.retarget_interval == 0
}

/// The required compact target for the block at `next_height`.
///
/// Off retarget boundaries this is the previous block's target. On a
/// boundary the observed timespan of the last window is clamped into
/// `[timespan/F, timespan·F]` and scales the previous target, bounded above
/// by the PoW limit. `first` must be the header at `next_height − N` when
/// `next_height` is a boundary.
pub fn next_required_difficulty(
    params: &NetworkParameters,
    next_height: Height,
    last: &Header,
    first: Option<&Header>,
) -> Result<CompactDifficulty, BlockError> {
    if !is_retarget_height(next_height, params) {
        return Ok(last.difficulty_threshold);
    }
    let first = first.ok_or(BlockError::ForkChooser(
        "retarget window start missing from the chain",
    ))?;

    let timespan = params.target_timespan_secs();
    let factor = params.retarget_adjustment_factor;
    let mut actual = last.time.timestamp() - first.time.timestamp();
    if actual < timespan / factor {
        actual = timespan / factor;
    }
    if actual > timespan * factor {
        actual = timespan * factor;
    }

    let last_target = last
        .difficulty_threshold
        .to_expanded()
        .ok_or(BlockError::InvalidHeader("previous target does not expand"))?;
    let pow_limit = params
        .pow_limit
        .to_expanded()
        .expect("configured pow limit expands");

    // targets top out near 2^224 and `actual` is below 2^22, so the
    // product cannot overflow 256 bits for any sane parameterization.
    let scaled = last_target.to_u256() * (actual as u64) / (timespan as u64);
    let new_target = if scaled > pow_limit.to_u256() {
        pow_limit
    } else {
        ExpandedDifficulty::from_u256(scaled)
    };

    Ok(new_target.to_compact())
}

/// Whether a candidate header's `bits` satisfy the local requirement.
///
/// Minimum-difficulty mode (test networks) additionally permits the PoW
/// limit off boundaries; it never forces it.
pub fn difficulty_is_acceptable(
    params: &NetworkParameters,
    candidate: CompactDifficulty,
    required: CompactDifficulty,
) -> bool {
    candidate == required || (params.min_difficulty_blocks && candidate == params.pow_limit)
}
