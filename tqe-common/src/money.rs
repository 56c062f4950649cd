//! Currency helpers
//!
//! Amounts are carried as exact decimals at full precision. Rounding to
//! cents happens only when a value crosses the display boundary.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places shown to customers
pub const CURRENCY_SCALE: u32 = 2;

/// Round to cents, half away from zero
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round up to the next multiple of `step` (`step` must be positive)
///
/// Values already on a multiple are returned unchanged.
pub fn ceil_to_multiple(value: Decimal, step: Decimal) -> Decimal {
    debug_assert!(step > Decimal::ZERO);
    (value / step).ceil() * step
}

/// True when `value` is an exact multiple of `step`
pub fn is_multiple_of(value: Decimal, step: Decimal) -> bool {
    step > Decimal::ZERO && (value % step).is_zero()
}
