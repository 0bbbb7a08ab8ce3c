use crate::error::AggregatorError;
use chrono::{DateTime, Utc};
use core_types::{Bar, Timeframe};
use rust_decimal::Decimal;

/// Accumulates ticks into the single in-progress bar of one (symbol, timeframe).
///
/// `open` is set by the first tick only, `high`/`low` move monotonically and
/// `close` always tracks the most recent price. Ticks are folded in the order
/// they arrive; their timestamps are not checked against the bucket.
#[derive(Debug, Clone)]
pub struct BarBuilder {
    symbol: String,
    timeframe: Timeframe,
    bar_start: DateTime<Utc>,
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Option<Decimal>,
    volume: Decimal,
    tick_count: u64,
    last_update: Option<DateTime<Utc>>,
}

impl BarBuilder {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, bar_start: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bar_start,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: Decimal::ZERO,
            tick_count: 0,
            last_update: None,
        }
    }

    /// Folds one tick into the bar.
    ///
    /// Negative volume is counted as a tick but adds nothing to the volume.
    pub fn add_tick(&mut self, price: Decimal, volume: Decimal, timestamp: DateTime<Utc>) {
        match (self.high, self.low) {
            (Some(high), Some(low)) => {
                self.high = Some(high.max(price));
                self.low = Some(low.min(price));
            }
            _ => {
                self.open = Some(price);
                self.high = Some(price);
                self.low = Some(price);
            }
        }
        self.close = Some(price);
        self.volume += volume.max(Decimal::ZERO);
        self.tick_count += 1;
        self.last_update = Some(timestamp);
    }

    /// Snapshots the current state as an immutable `Bar`.
    pub fn to_bar(&self) -> Result<Bar, AggregatorError> {
        let (Some(open), Some(high), Some(low), Some(close)) = (self.open, self.high, self.low, self.close)
        else {
            return Err(AggregatorError::EmptyBar {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe.to_string(),
            });
        };

        Ok(Bar {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            timestamp: self.bar_start,
            open,
            high,
            low,
            close,
            volume: self.volume,
            tick_count: self.tick_count,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &Timeframe {
        &self.timeframe
    }

    pub fn bar_start(&self) -> DateTime<Utc> {
        self.bar_start
    }

    /// Exclusive end of this builder's bucket.
    pub fn bar_end(&self) -> DateTime<Utc> {
        self.timeframe.bucket_end(self.bar_start)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_none()
    }
}
