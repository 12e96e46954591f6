//! Simulated Rate Source
//!
//! Random-walk pricing: each tick moves the current value by a uniformly
//! drawn relative step within `±volatility`, then rounds to the configured
//! precision. Instruments without a value stay without one.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;

use crate::application::ports::{RateSource, RateSourceError};
use crate::domain::instrument::InstrumentId;

/// Step resolution: draws are in millionths of the current value.
const STEP_SCALE: u32 = 6;

/// Millionths per basis point.
const MICROS_PER_BPS: i64 = 100;

/// Random-walk rate source.
#[derive(Debug, Clone)]
pub struct SimulatedRateSource {
    /// Maximum step in millionths of the current value.
    max_step_micros: i64,
    precision: u32,
}

impl SimulatedRateSource {
    /// Create a source moving at most `volatility_bps` basis points per tick,
    /// rounding to `precision` decimal places.
    #[must_use]
    pub fn new(volatility_bps: u32, precision: u32) -> Self {
        Self {
            max_step_micros: i64::from(volatility_bps) * MICROS_PER_BPS,
            precision,
        }
    }

    /// Apply a relative step of `step_micros` millionths to `current`.
    fn step(&self, current: Decimal, step_micros: i64) -> Option<Decimal> {
        let factor = Decimal::ONE + Decimal::new(step_micros, STEP_SCALE);
        current
            .checked_mul(factor)
            .map(|v| v.round_dp(self.precision))
    }

    fn draw(&self) -> i64 {
        if self.max_step_micros == 0 {
            return 0;
        }
        rand::rng().random_range(-self.max_step_micros..=self.max_step_micros)
    }
}

#[async_trait]
impl RateSource for SimulatedRateSource {
    async fn next_value(
        &self,
        instrument: &InstrumentId,
        current: Option<Decimal>,
    ) -> Result<Option<Decimal>, RateSourceError> {
        let Some(current) = current else {
            return Ok(None);
        };

        let next = self
            .step(current, self.draw())
            .ok_or_else(|| RateSourceError::InvalidValue {
                instrument: instrument.clone(),
                reason: format!("{current} overflowed"),
            })?;

        // Rounding can only flatten very small values; never publish zero
        if next <= Decimal::ZERO {
            return Ok(Some(current));
        }

        Ok(Some(next))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use proptest::prelude::*;

    use super::*;

    fn zar() -> InstrumentId {
        InstrumentId::parse("ZAR").unwrap()
    }

    #[tokio::test]
    async fn missing_value_stays_missing() {
        let source = SimulatedRateSource::new(50, 6);
        assert_eq!(source.next_value(&zar(), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_volatility_keeps_value() {
        let source = SimulatedRateSource::new(0, 6);
        let value = Decimal::from_str("17.49").unwrap();
        assert_eq!(
            source.next_value(&zar(), Some(value)).await.unwrap(),
            Some(value)
        );
    }

    #[tokio::test]
    async fn overflow_is_reported() {
        let source = SimulatedRateSource::new(9_999, 6);
        let mut failures = 0;
        for _ in 0..64 {
            if source.next_value(&zar(), Some(Decimal::MAX)).await.is_err() {
                failures += 1;
            }
        }
        // Any upward draw overflows
        assert!(failures > 0);
    }

    #[test]
    fn step_rounds_to_precision() {
        let source = SimulatedRateSource::new(50, 2);
        let next = source.step(Decimal::from_str("17.49").unwrap(), 5_000).unwrap();
        // 17.49 * 1.005 = 17.57745
        assert_eq!(next, Decimal::from_str("17.58").unwrap());
    }

    proptest! {
        #[test]
        fn step_stays_within_volatility(
            cents in 1i64..100_000_000,
            bps in 0u32..500,
            precision in 2u32..=8,
            unit in -1.0f64..=1.0,
        ) {
            let source = SimulatedRateSource::new(bps, precision);
            let current = Decimal::new(cents, 2);
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let step = (unit * source.max_step_micros as f64) as i64;

            let next = source.step(current, step).unwrap();

            let bound = current * Decimal::new(i64::from(bps), 4)
                + Decimal::new(5, precision + 1);
            prop_assert!((next - current).abs() <= bound);
            prop_assert!(next.scale() <= precision);
        }
    }
}
