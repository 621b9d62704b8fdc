//! Candle reconciliation engine.
//!
//! [`CandlePlotData`] owns one candle series and merges two asynchronous
//! sources into it:
//!
//! - consolidated candles returned by periodic broker queries, kept in a
//!   sorted, deduplicated sequence ([`ConsolidatedData`]);
//! - realtime trade ticks, folded into a short tail of still-mutable
//!   candles ([`RealtimeData`]).
//!
//! Whenever consolidated data arrives, tail entries for periods the broker
//! has now confirmed are dropped, and the broker's still-forming candle
//! seeds a tail entry so subsequent ticks have somewhere to land.
//!
//! The two halves sit behind independent read/write locks so the tick path
//! never waits on a bar refresh. Code that needs both always takes the
//! realtime lock first.

pub mod realtime;
pub mod store;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::conditions::TradeContext;
use crate::models::candle::{Candle, CandleResolution};

pub use realtime::{PlotState, RealtimeCandle, RealtimeData};
pub use store::{Attachment, ChartId, PriceDataStore};

/// Broker-confirmed candles of one series.
#[derive(Debug)]
pub struct ConsolidatedData {
    resolution: Option<CandleResolution>,
    candles: Vec<Candle>,
    /// Newest period start received from the broker, provisional included.
    last_timestamp: Option<DateTime<Utc>>,
}

impl ConsolidatedData {
    fn new() -> Self {
        Self {
            resolution: None,
            candles: Vec::new(),
            last_timestamp: None,
        }
    }

    /// Confirmed candles, strictly increasing by timestamp.
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn resolution(&self) -> Option<CandleResolution> {
        self.resolution
    }

    /// Period start of the newest candle received from the broker.
    ///
    /// `None` until the first non-empty query result has been applied.
    pub fn last_consolidated_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// The confirmed candle for `period`, if any.
    pub fn find(&self, period: DateTime<Utc>) -> Option<&Candle> {
        self.candles
            .binary_search_by_key(&period, |c| c.timestamp)
            .ok()
            .map(|i| &self.candles[i])
    }

    fn clear(&mut self) {
        self.resolution = None;
        self.candles.clear();
        self.last_timestamp = None;
    }
}

/// What a call to [`CandlePlotData::update_consolidated_candles`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Closed candles handed to the merge (before deduplication).
    pub appended: usize,
    /// Realtime entries superseded by confirmed candles or skipped by the
    /// broker.
    pub dropped: usize,
    /// Periods whose realtime values disagreed with the broker.
    pub mismatched: Vec<DateTime<Utc>>,
    /// Whether a tail entry was seeded from the provisional candle.
    pub seeded: bool,
}

/// Outcome of a single realtime tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDisposition {
    /// Merged into the realtime tail.
    Applied,
    /// No consolidated candles yet; dropped.
    NotSeeded,
    /// Falls into a period the broker has already confirmed; dropped.
    Stale,
    /// Series is closed; dropped.
    Closed,
}

#[derive(Debug, Default)]
struct PlotStatus {
    last_error: Option<String>,
    stale: bool,
}

/// One reconciled candle series, shared between the refresh path, the tick
/// path and renderers.
#[derive(Debug)]
pub struct CandlePlotData {
    label: String,
    realtime: RwLock<RealtimeData>,
    data: RwLock<ConsolidatedData>,
    status: Mutex<PlotStatus>,
}

impl CandlePlotData {
    /// Creates an empty series; `label` identifies it in log output.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            realtime: RwLock::new(RealtimeData::new()),
            data: RwLock::new(ConsolidatedData::new()),
            status: Mutex::new(PlotStatus::default()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> PlotState {
        self.realtime.read().state
    }

    /// Read access to the confirmed candles for one rendering pass.
    pub fn read_data(&self) -> RwLockReadGuard<'_, ConsolidatedData> {
        self.data.read()
    }

    /// Read access to the realtime tail for one rendering pass.
    pub fn read_realtime(&self) -> RwLockReadGuard<'_, RealtimeData> {
        self.realtime.read()
    }

    /// Period start of the newest consolidated candle, or `None` before the
    /// first query result.
    pub fn last_consolidated_timestamp(&self) -> Option<DateTime<Utc>> {
        self.data.read().last_timestamp
    }

    /// Applies the result of a broker candle query.
    ///
    /// The last candle is treated as provisional: it seeds the realtime tail
    /// instead of entering the confirmed sequence. The rest are merged by a
    /// stable sort on timestamp, keeping the later arrival when two share a
    /// period. Empty input leaves the series untouched.
    pub fn update_consolidated_candles(
        &self,
        resolution: CandleResolution,
        new_candles: Vec<Candle>,
    ) -> ConsolidationReport {
        let mut candles = new_candles;
        let Some(mut provisional) = candles.pop() else {
            debug!(plot = %self.label, "empty candle query result");
            return ConsolidationReport::default();
        };

        if self.state() == PlotState::Closed {
            debug!(plot = %self.label, "ignoring candles for closed plot");
            return ConsolidationReport::default();
        }

        provisional.timestamp = resolution.period_start(provisional.timestamp);
        for candle in &mut candles {
            candle.timestamp = resolution.period_start(candle.timestamp);
        }

        let appended = candles.len();
        let resolution_changed = {
            let mut data = self.data.write();
            let changed = data.resolution != Some(resolution);
            if changed {
                if let Some(previous) = data.resolution {
                    info!(plot = %self.label, %previous, %resolution, "candle resolution changed");
                }
                data.clear();
                data.resolution = Some(resolution);
            }

            data.candles.extend(candles);
            data.candles.sort_by_key(|c| c.timestamp);
            dedup_keep_last(&mut data.candles);

            let newest = data.candles.last().map(|c| c.timestamp);
            data.last_timestamp = newest.max(Some(provisional.timestamp));
            changed
        };

        let mut report = self.consolidate_realtime_data(&provisional, resolution_changed);
        report.appended = appended;
        debug!(
            plot = %self.label,
            appended = report.appended,
            dropped = report.dropped,
            seeded = report.seeded,
            "applied consolidated candles"
        );
        report
    }

    /// Drops tail entries the broker has confirmed or skipped and seeds the
    /// tail from the provisional candle.
    fn consolidate_realtime_data(&self, provisional: &Candle, reset: bool) -> ConsolidationReport {
        let mut realtime = self.realtime.write();
        let data = self.data.read();
        let mut report = ConsolidationReport::default();

        if reset {
            realtime.entries.clear();
            realtime.first_live_period = None;
        }

        let before = realtime.entries.len();
        let label = &self.label;
        let frontier = provisional.timestamp;
        realtime.entries.retain(|entry| {
            let Some(confirmed) = data.find(entry.timestamp) else {
                if entry.timestamp < frontier {
                    // The broker moved past this period without a bar for it.
                    debug!(
                        plot = %label,
                        period = %entry.timestamp,
                        volume = %entry.volume,
                        "dropping tail entry the broker skipped"
                    );
                    return false;
                }
                return true;
            };
            if entry.disagrees_with(confirmed) {
                warn!(
                    plot = %label,
                    period = %entry.timestamp,
                    realtime_open = ?entry.open,
                    realtime_high = ?entry.high,
                    realtime_low = ?entry.low,
                    realtime_close = ?entry.close,
                    realtime_volume = %entry.volume,
                    open = %confirmed.open,
                    high = %confirmed.high,
                    low = %confirmed.low,
                    close = %confirmed.close,
                    volume = %confirmed.volume,
                    "realtime candle disagrees with consolidated candle"
                );
                report.mismatched.push(entry.timestamp);
            }
            false
        });
        report.dropped = before - realtime.entries.len();

        let period = provisional.timestamp;
        if data.find(period).is_none()
            && let Err(pos) = realtime
                .entries
                .binary_search_by_key(&period, |e| e.timestamp)
        {
            realtime.entries.insert(pos, RealtimeCandle::seeded(provisional));
            report.seeded = true;
        }

        if realtime.state == PlotState::Uninitialized || (reset && realtime.state == PlotState::Live)
        {
            realtime.state = PlotState::Seeded;
        }

        report
    }

    /// Merges one realtime trade into the tail.
    ///
    /// Dropped without error when no consolidated data exists yet or when
    /// the trade belongs to a period the broker has already confirmed.
    pub fn add_realtime_data(
        &self,
        timestamp: DateTime<Utc>,
        price: Decimal,
        volume: Decimal,
        ctx: TradeContext,
    ) -> TickDisposition {
        let mut realtime = self.realtime.write();
        if realtime.state == PlotState::Closed {
            return TickDisposition::Closed;
        }

        let period = {
            let data = self.data.read();
            let (Some(resolution), Some(last)) = (data.resolution, data.last_timestamp) else {
                debug!(plot = %self.label, %timestamp, "dropping tick received before consolidated data");
                return TickDisposition::NotSeeded;
            };

            let period = resolution.period_start(timestamp);
            if resolution.periods_between(last, timestamp) < 0 || data.find(period).is_some() {
                warn!(
                    plot = %self.label,
                    %timestamp,
                    last_consolidated = %last,
                    "dropping stale tick"
                );
                return TickDisposition::Stale;
            }
            period
        };

        let idx = realtime.entry_index(period);
        if realtime.first_live_period.is_none() {
            realtime.first_live_period = Some(period);
            realtime.state = PlotState::Live;
        }
        realtime.entries[idx].apply(timestamp, price, volume, ctx);

        TickDisposition::Applied
    }

    /// Returns `true` if tail entry `i` has open, high, low and close set.
    pub fn has_valid_realtime_prices(&self, i: usize) -> bool {
        self.realtime
            .read()
            .get(i)
            .is_some_and(RealtimeCandle::has_valid_prices)
    }

    /// Owned copy of the full series: confirmed candles followed by every
    /// tail entry with complete prices.
    pub fn snapshot(&self) -> Vec<Candle> {
        let realtime = self.realtime.read();
        let data = self.data.read();

        let mut candles = data.candles.clone();
        candles.extend(
            realtime
                .entries
                .iter()
                .filter(|e| data.find(e.timestamp).is_none())
                .filter_map(RealtimeCandle::to_candle),
        );
        candles.sort_by_key(|c| c.timestamp);
        candles
    }

    /// Moves the series to [`PlotState::Closed`] and releases its candles.
    pub fn close(&self) {
        let mut realtime = self.realtime.write();
        let mut data = self.data.write();
        realtime.entries.clear();
        realtime.first_live_period = None;
        realtime.state = PlotState::Closed;
        data.clear();
        debug!(plot = %self.label, "closed plot");
    }

    /// Records a failed refresh for display next to the chart.
    pub fn record_error(&self, message: impl Into<String>) {
        self.status.lock().last_error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.status.lock().last_error = None;
    }

    /// Message of the most recent failed refresh, if it has not succeeded since.
    pub fn last_error(&self) -> Option<String> {
        self.status.lock().last_error.clone()
    }

    /// Flags the series as no longer receiving realtime updates.
    pub fn mark_stale(&self, stale: bool) {
        self.status.lock().stale = stale;
    }

    pub fn is_stale(&self) -> bool {
        self.status.lock().stale
    }
}

/// Removes runs of equal timestamps, keeping the last entry of each run.
fn dedup_keep_last(candles: &mut Vec<Candle>) {
    let mut kept: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles.drain(..) {
        match kept.last_mut() {
            Some(last) if last.timestamp == candle.timestamp => *last = candle,
            _ => kept.push(candle),
        }
    }
    *candles = kept;
}
