//! Tolerance evaluation for numeric measurements.
//!
//! A measured value passes when it falls strictly inside the
//! `(lower_limit, upper_limit)` window after rounding to the configured
//! number of fractional digits. Rounding is half-to-even (ISO 80000-1) so
//! repeated runs near a boundary carry no systematic bias, and the
//! comparison happens on fixed-precision decimals rather than raw binary
//! floats so the verdict is reproducible across platforms.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::core::MeasurementOutcome;

/// Evaluate a measured value against an exclusive tolerance window.
///
/// `value` is rounded to `precision` fractional digits with banker's
/// rounding first. Values exactly at either limit fail. Non-finite values
/// fail: they cannot lie inside any finite window.
pub fn evaluate(value: f64, lower: f64, upper: f64, precision: u32) -> MeasurementOutcome {
    let (Some(value), Some(lower), Some(upper)) = (
        Decimal::from_f64(value),
        Decimal::from_f64(lower),
        Decimal::from_f64(upper),
    ) else {
        return MeasurementOutcome::Fail;
    };
    let rounded = value.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven);
    if lower < rounded && rounded < upper {
        MeasurementOutcome::Pass
    } else {
        MeasurementOutcome::Fail
    }
}
