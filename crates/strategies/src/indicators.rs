//! Thin wrappers over the `ta` crate that take our `Decimal` bars and return the
//! latest indicator value, or `None` while there is not enough history.

use crate::error::StrategyError;
use configuration::MaType;
use core_types::Bar;
use rust_decimal::prelude::*;
use ta::indicators::{
    AverageTrueRange, ExponentialMovingAverage as Ema, RelativeStrengthIndex,
    SimpleMovingAverage as Sma,
};
use ta::{DataItem, Next};

fn ta_error(e: ta::errors::TaError) -> StrategyError {
    StrategyError::IndicatorError(format!("{e:?}"))
}

fn to_f64(value: Decimal) -> Result<f64, StrategyError> {
    value
        .to_f64()
        .ok_or_else(|| StrategyError::IndicatorError(format!("{value} does not fit in f64")))
}

fn to_decimal(value: f64) -> Result<Decimal, StrategyError> {
    Decimal::from_f64(value)
        .ok_or_else(|| StrategyError::IndicatorError(format!("indicator produced {value}")))
}

fn last_of<I>(indicator: &mut I, bars: &[Bar]) -> Result<f64, StrategyError>
where
    I: Next<f64, Output = f64>,
{
    let mut last = 0.0;
    for bar in bars {
        last = indicator.next(to_f64(bar.close)?);
    }
    Ok(last)
}

fn check_period(period: usize) -> Result<(), StrategyError> {
    if period == 0 {
        return Err(StrategyError::InvalidParameters(
            "indicator period cannot be zero".to_string(),
        ));
    }
    Ok(())
}

/// Moving average of closes over the last `period` bars.
pub fn moving_average(bars: &[Bar], period: usize, kind: MaType) -> Result<Option<Decimal>, StrategyError> {
    check_period(period)?;
    if bars.len() < period {
        return Ok(None);
    }
    let value = match kind {
        MaType::Sma => last_of(&mut Sma::new(period).map_err(ta_error)?, bars)?,
        MaType::Ema => last_of(&mut Ema::new(period).map_err(ta_error)?, bars)?,
    };
    to_decimal(value).map(Some)
}

/// RSI of closes, 0..=100.
pub fn rsi(bars: &[Bar], period: usize) -> Result<Option<Decimal>, StrategyError> {
    check_period(period)?;
    if bars.len() <= period {
        return Ok(None);
    }
    let mut indicator = RelativeStrengthIndex::new(period).map_err(ta_error)?;
    let value = last_of(&mut indicator, bars)?;
    to_decimal(value).map(Some)
}

/// Average true range over the bars' high/low/close.
pub fn atr(bars: &[Bar], period: usize) -> Result<Option<Decimal>, StrategyError> {
    check_period(period)?;
    if bars.len() <= period {
        return Ok(None);
    }
    let mut indicator = AverageTrueRange::new(period).map_err(ta_error)?;
    let mut last = 0.0;
    for bar in bars {
        let item = DataItem::builder()
            .open(to_f64(bar.open)?)
            .high(to_f64(bar.high)?)
            .low(to_f64(bar.low)?)
            .close(to_f64(bar.close)?)
            .volume(to_f64(bar.volume)?)
            .build()
            .map_err(ta_error)?;
        last = indicator.next(&item);
    }
    to_decimal(last).map(Some)
}

/// MA separation scaled so that a 5% gap between fast and slow reads as 1.0.
pub fn trend_strength(fast: Decimal, slow: Decimal) -> Decimal {
    if slow.is_zero() {
        return Decimal::ZERO;
    }
    ((fast - slow).abs() / slow / Decimal::new(5, 2)).min(Decimal::ONE)
}


#[cfg(test)]
mod tests {
    use super::test_bars::from_closes;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn not_enough_history_yields_none() {
        let bars = from_closes("MNQ", "5m", &[dec!(1), dec!(2)]);
        assert_eq!(moving_average(&bars, 3, MaType::Sma).unwrap(), None);
        assert_eq!(rsi(&bars, 2).unwrap(), None);
        assert_eq!(atr(&bars, 2).unwrap(), None);
    }

    #[test]
    fn sma_matches_hand_computation() {
        let bars = from_closes("MNQ", "5m", &[dec!(1), dec!(2), dec!(3), dec!(4)]);
        assert_eq!(moving_average(&bars, 2, MaType::Sma).unwrap(), Some(dec!(3.5)));
    }

    #[test]
    fn zero_period_is_rejected() {
        let bars = from_closes("MNQ", "5m", &[dec!(1)]);
        assert!(matches!(
            moving_average(&bars, 0, MaType::Ema),
            Err(StrategyError::InvalidParameters(_))
        ));
    }

    #[test]
    fn rsi_is_low_after_a_selloff() {
        let mut closes = vec![dec!(100); 20];
        closes.extend([dec!(98), dec!(96), dec!(94), dec!(92), dec!(90)]);
        let bars = from_closes("MNQ", "5m", &closes);
        let value = rsi(&bars, 14).unwrap().unwrap();
        assert!(value < dec!(30), "rsi was {value}");
    }

    #[test]
    fn strength_saturates_at_five_percent() {
        assert_eq!(trend_strength(dec!(105), dec!(100)), dec!(1));
        assert_eq!(trend_strength(dec!(101), dec!(100)), dec!(0.2));
        assert_eq!(trend_strength(dec!(1), dec!(0)), dec!(0));
    }
}
