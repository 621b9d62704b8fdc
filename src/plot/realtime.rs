//! Live-built candles that have not been confirmed by the broker yet.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::conditions::TradeContext;
use crate::models::candle::Candle;

/// Lifecycle of one candle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotState {
    /// No consolidated candles received yet; ticks are dropped.
    Uninitialized,
    /// Consolidated candles received, no tick merged yet.
    Seeded,
    /// Realtime ticks are being merged into the tail.
    Live,
    /// Unsubscribed; all updates are ignored.
    Closed,
}

/// One still-mutable candle of the realtime tail.
///
/// Prices stay `None` until a tick that is allowed to set them arrives, so
/// an entry built only from volume-only trades has no usable OHLC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeCandle {
    /// Start of the candle's period.
    pub timestamp: DateTime<Utc>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Decimal,
    /// Timestamp of the trade that set `open`.
    pub open_timestamp: Option<DateTime<Utc>>,
    /// Timestamp of the trade that set `close`.
    pub close_timestamp: Option<DateTime<Utc>>,
    /// Whether `open` is known to be the period's first trade.
    pub open_consolidated: bool,
}

impl RealtimeCandle {
    /// An empty entry created by the first tick of a period.
    pub fn empty(timestamp: DateTime<Utc>, open_consolidated: bool) -> Self {
        Self {
            timestamp,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: Decimal::ZERO,
            open_timestamp: None,
            close_timestamp: None,
            open_consolidated,
        }
    }

    /// An entry seeded from the broker's still-forming candle.
    ///
    /// The open is pinned to the period start so no later tick can replace
    /// it; the close is left free for the next tick.
    pub fn seeded(candle: &Candle) -> Self {
        Self {
            timestamp: candle.timestamp,
            open: Some(candle.open),
            high: Some(candle.high),
            low: Some(candle.low),
            close: Some(candle.close),
            volume: candle.volume,
            open_timestamp: Some(candle.timestamp),
            close_timestamp: None,
            open_consolidated: true,
        }
    }

    /// Merges one trade into the candle according to its context.
    ///
    /// Open and close are resolved by trade timestamp, so the result does
    /// not depend on arrival order.
    pub fn apply(
        &mut self,
        timestamp: DateTime<Utc>,
        price: Decimal,
        volume: Decimal,
        ctx: TradeContext,
    ) {
        if ctx.update_high_low {
            self.high = Some(self.high.map_or(price, |h| h.max(price)));
            self.low = Some(self.low.map_or(price, |l| l.min(price)));
        }

        if ctx.update_last {
            if self.open_timestamp.is_none_or(|t| timestamp < t) {
                self.open = Some(price);
                self.open_timestamp = Some(timestamp);
            }
            if self.close_timestamp.is_none_or(|t| timestamp >= t) {
                self.close = Some(price);
                self.close_timestamp = Some(timestamp);
            }
        }

        if ctx.update_volume {
            self.volume += volume;
        }
    }

    /// Returns `true` once open, high, low and close are all populated.
    pub fn has_valid_prices(&self) -> bool {
        self.open.is_some() && self.high.is_some() && self.low.is_some() && self.close.is_some()
    }

    /// Converts to a plain candle if every price is populated.
    pub fn to_candle(&self) -> Option<Candle> {
        Some(Candle {
            timestamp: self.timestamp,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
            volume: self.volume,
        })
    }

    /// Returns `true` if any populated value differs from `candle`.
    pub fn disagrees_with(&self, candle: &Candle) -> bool {
        let differs = |value: Option<Decimal>, expected: Decimal| value.is_some_and(|v| v != expected);

        differs(self.open, candle.open)
            || differs(self.high, candle.high)
            || differs(self.low, candle.low)
            || differs(self.close, candle.close)
            || self.volume != candle.volume
    }
}

/// The realtime tail of a candle series, ordered by period start.
#[derive(Debug)]
pub struct RealtimeData {
    pub(super) entries: Vec<RealtimeCandle>,
    pub(super) state: PlotState,
    /// Period of the first tick merged since seeding.
    pub(super) first_live_period: Option<DateTime<Utc>>,
}

impl RealtimeData {
    pub(super) fn new() -> Self {
        Self {
            entries: Vec::new(),
            state: PlotState::Uninitialized,
            first_live_period: None,
        }
    }

    /// Tail entries, oldest first.
    pub fn entries(&self) -> &[RealtimeCandle] {
        &self.entries
    }

    pub fn get(&self, i: usize) -> Option<&RealtimeCandle> {
        self.entries.get(i)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> PlotState {
        self.state
    }

    /// Index of the entry for `period`, creating it if needed.
    pub(super) fn entry_index(&mut self, period: DateTime<Utc>) -> usize {
        match self.entries.binary_search_by_key(&period, |e| e.timestamp) {
            Ok(i) => i,
            Err(pos) => {
                let open_consolidated = self.first_live_period.is_some_and(|first| period > first);
                self.entries
                    .insert(pos, RealtimeCandle::empty(period, open_consolidated));
                pos
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    fn at(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 9, min, sec).unwrap()
    }

    #[test]
    fn volume_only_trade_leaves_prices_empty() {
        let mut candle = RealtimeCandle::empty(at(35, 0), false);
        let ctx = TradeContext {
            update_last: false,
            update_high_low: false,
            ..TradeContext::REGULAR
        };
        candle.apply(at(35, 3), dec!(100), dec!(7), ctx);

        assert!(!candle.has_valid_prices());
        assert!(candle.to_candle().is_none());
        assert_eq!(candle.volume, dec!(7));
    }

    #[test]
    fn high_low_without_last_keeps_open_and_close() {
        let mut candle = RealtimeCandle::empty(at(35, 0), false);
        candle.apply(at(35, 1), dec!(100), dec!(1), TradeContext::REGULAR);
        let ctx = TradeContext {
            update_last: false,
            ..TradeContext::REGULAR
        };
        candle.apply(at(35, 2), dec!(105), dec!(1), ctx);

        assert_eq!(candle.open, Some(dec!(100)));
        assert_eq!(candle.close, Some(dec!(100)));
        assert_eq!(candle.high, Some(dec!(105)));
        assert_eq!(candle.volume, dec!(2));
    }

    #[test]
    fn seeded_open_is_not_replaced() {
        let seed = Candle {
            timestamp: at(34, 0),
            open: dec!(98),
            high: dec!(99),
            low: dec!(97),
            close: dec!(98.5),
            volume: dec!(100),
        };
        let mut candle = RealtimeCandle::seeded(&seed);
        candle.apply(at(34, 0), dec!(96), dec!(5), TradeContext::REGULAR);

        assert_eq!(candle.open, Some(dec!(98)));
        assert_eq!(candle.close, Some(dec!(96)));
        assert_eq!(candle.low, Some(dec!(96)));
        assert_eq!(candle.volume, dec!(105));
        assert!(candle.open_consolidated);
    }

    #[test]
    fn disagreement_ignores_missing_prices() {
        let reference = Candle {
            timestamp: at(35, 0),
            open: dec!(1),
            high: dec!(2),
            low: dec!(1),
            close: dec!(2),
            volume: dec!(3),
        };
        let mut candle = RealtimeCandle::empty(at(35, 0), false);
        candle.volume = dec!(3);
        assert!(!candle.disagrees_with(&reference));

        candle.close = Some(dec!(2.5));
        assert!(candle.disagrees_with(&reference));
    }
}
