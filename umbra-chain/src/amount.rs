//! Monetary constants and helpers.
//!
//! Values are plain `i64` satoshi counts on the wire; arithmetic in
//! validation code uses the checked helpers here so overflow surfaces as an
//! error instead of wrapping.

/// The number of satoshis in one coin.
pub const COIN: i64 = 100_000_000;

/// The largest representable monetary value, used as a sanity ceiling in
/// validation. 21 million coins, the Bitcoin-inherited bound.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Sum an iterator of values, failing on overflow or a sum above MAX_MONEY.
pub fn sum<I: IntoIterator<Item = i64>>(values: I) -> Option<i64> {
    let mut total: i64 = 0;
    for value in values {
        total = total.checked_add(value)?;
        if total > MAX_MONEY {
            return None;
        }
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_detects_overflow() {
        assert_eq!(sum(vec![1, 2, 3]), Some(6));
        assert_eq!(sum(vec![i64::MAX, 1]), None);
        assert_eq!(sum(vec![MAX_MONEY, 1]), None);
    }
}
