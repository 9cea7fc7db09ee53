//! Centralised float-arithmetic helpers for USD valuation.
//!
//! All `cast_precision_loss` / `float_arithmetic` lint expects live here so that the valuation and
//! rendering code stays lint-clean.

#![expect(
    clippy::cast_precision_loss,
    clippy::float_arithmetic,
    reason = "dedicated float-math module; casts and arithmetic are intentional"
)]

use alloy::primitives::U256;

/// Convert a raw on-chain amount into whole token units.
///
/// The decimal point is placed in the integer's decimal string before parsing,
/// so amounts beyond `u128` keep their leading digits.
pub fn units_to_f64(raw: U256, decimals: u8) -> f64 {
    let digits = raw.to_string();
    let d = usize::from(decimals);
    let s = if digits.len() > d {
        let (int, frac) = digits.split_at(digits.len() - d);
        format!("{int}.{frac}")
    } else {
        format!("0.{digits:0>d$}")
    };
    s.parse::<f64>().unwrap_or(0.0_f64)
}

/// USD value of `units` at `price` per whole token.
pub fn usd_value(units: f64, price: f64) -> f64 {
    units * price
}

/// Collateral over debt, only when both sides carry value.
pub fn collateral_ratio(collateral_usd: f64, debt_usd: f64) -> Option<f64> {
    (collateral_usd > 0.0_f64 && debt_usd > 0.0_f64).then(|| collateral_usd / debt_usd)
}

/// Liquidation threshold in percent (`9_000` bps → `90.0`).
pub fn lt_bps_to_percent(bps: u16) -> f64 {
    f64::from(bps) / 100.0_f64
}

/// Sum a slice of `f64` values.
pub fn sum_f64(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |a, b| a + b)
}

/// Arithmetic mean; `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0_f64;
    }
    sum_f64(values) / values.len() as f64
}

/// Accumulate a value into a running total (in-place addition).
pub fn accum(total: &mut f64, value: f64) {
    *total += value;
}
