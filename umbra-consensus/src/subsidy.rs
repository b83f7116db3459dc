//! The block subsidy schedule.

use umbra_chain::amount::COIN;
use umbra_chain::block::Height;
use umbra_chain::parameters::NetworkParameters;

/// The miner subsidy at `height`, in satoshis.
///
/// The subsidy halves every `halving_interval` blocks as a right shift of
/// the *whole-coin* amount, so odd coin counts round down a full coin per
/// halving. After 64 halvings the subsidy is zero.
pub fn block_subsidy(height: Height, params: &NetworkParameters) -> i64 {
    let halvings = height.0 / params.halving_interval;
    if halvings >= 64 {
        return 0;
    }
    let whole_coins = params.base_subsidy / COIN;
    (whole_coins >> halvings) * COIN
}
