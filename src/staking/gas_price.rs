// Min gas price feedback - discrete self-calibration at epoch seal
// Contract: monotonic response to over/under-target usage, rate of change
// bounded per epoch by the trim band and smoothed by the counterweight.

use crate::types::{mul_div, UNIT};

/// Starting min gas price for a fresh engine
pub const INITIAL_MIN_GAS_PRICE: u128 = 1_000_000_000;

/// Absolute floor/ceiling the feedback can never leave
pub const MIN_GAS_PRICE_FLOOR: u128 = 1_000_000;
pub const MIN_GAS_PRICE_CEILING: u128 = 1_000_000 * 1_000_000_000;

/// Per-epoch change ratio band: [95%, 105%]
const RATIO_FLOOR: u128 = UNIT - UNIT / 20;
const RATIO_CEILING: u128 = UNIT + UNIT / 20;

fn trim_ratio(ratio: u128) -> u128 {
    ratio.clamp(RATIO_FLOOR, RATIO_CEILING)
}

fn trim_price(price: u128) -> u128 {
    price.clamp(MIN_GAS_PRICE_FLOOR, MIN_GAS_PRICE_CEILING)
}

/// Produces the next min gas price from the sealed epoch's gas usage.
///
/// The raw adjustment ratio is `gasUsed / (duration * target)`, trimmed to
/// the ±5% band, then blended toward 1.0 with weight `counterweight /
/// (duration + counterweight)` so short epochs cannot swing the price.
pub fn recalibrate(
    prev: u128,
    epoch_duration: u64,
    epoch_gas_used: u128,
    target_gas_power_per_second: u64,
    counterweight: u64,
) -> u128 {
    if epoch_duration == 0 || target_gas_power_per_second == 0 {
        return trim_price(prev);
    }
    let target_total = epoch_duration as u128 * target_gas_power_per_second as u128;
    let ratio = trim_ratio(mul_div(epoch_gas_used, UNIT, target_total));
    let blended = (ratio * epoch_duration as u128 + UNIT * counterweight as u128)
        / (epoch_duration as u128 + counterweight as u128);
    trim_price(mul_div(prev, blended, UNIT))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: u64 = 2_000_000;
    const CW: u64 = 6 * 3_600;
    const HOUR: u64 = 3_600;

    fn gas_at(duration: u64, fraction_percent: u128) -> u128 {
        duration as u128 * TARGET as u128 * fraction_percent / 100
    }

    #[test]
    fn test_on_target_is_stable() {
        let next = recalibrate(INITIAL_MIN_GAS_PRICE, HOUR, gas_at(HOUR, 100), TARGET, CW);
        assert_eq!(next, INITIAL_MIN_GAS_PRICE);
    }

    #[test]
    fn test_monotonic_in_usage() {
        let low = recalibrate(INITIAL_MIN_GAS_PRICE, HOUR, gas_at(HOUR, 50), TARGET, CW);
        let mid = recalibrate(INITIAL_MIN_GAS_PRICE, HOUR, gas_at(HOUR, 100), TARGET, CW);
        let high = recalibrate(INITIAL_MIN_GAS_PRICE, HOUR, gas_at(HOUR, 200), TARGET, CW);
        assert!(low < mid);
        assert!(mid < high);
    }

    #[test]
    fn test_rate_of_change_bounded() {
        // even absurd over/under-usage moves the price at most 5% per epoch
        let up = recalibrate(INITIAL_MIN_GAS_PRICE, 7 * 86_400, u128::MAX / UNIT, TARGET, CW);
        assert!(up <= INITIAL_MIN_GAS_PRICE * 105 / 100);

        let down = recalibrate(INITIAL_MIN_GAS_PRICE, 7 * 86_400, 0, TARGET, CW);
        assert!(down >= INITIAL_MIN_GAS_PRICE * 95 / 100);
        assert!(down < INITIAL_MIN_GAS_PRICE);
    }

    #[test]
    fn test_counterweight_dampens_short_epochs() {
        // one short epoch at double usage moves the price less than a long one
        let short = recalibrate(INITIAL_MIN_GAS_PRICE, HOUR, gas_at(HOUR, 200), TARGET, CW);
        let long = recalibrate(
            INITIAL_MIN_GAS_PRICE,
            7 * 86_400,
            gas_at(7 * 86_400, 200),
            TARGET,
            CW,
        );
        assert!(short > INITIAL_MIN_GAS_PRICE);
        assert!(short < long);
    }

    #[test]
    fn test_absolute_clamps() {
        let mut price = MIN_GAS_PRICE_FLOOR;
        price = recalibrate(price, HOUR, 0, TARGET, CW);
        assert_eq!(price, MIN_GAS_PRICE_FLOOR);

        let mut price = MIN_GAS_PRICE_CEILING;
        price = recalibrate(price, HOUR, gas_at(HOUR, 500), TARGET, CW);
        assert_eq!(price, MIN_GAS_PRICE_CEILING);
    }

    #[test]
    fn test_zero_duration_is_inert() {
        assert_eq!(recalibrate(123_456_789, 0, 10, TARGET, CW), 123_456_789);
    }
}
