//! Ownership of candle series shared between charts.
//!
//! Every series of one instrument draws its ticks from a single trade
//! subscription on the broker's [`RealtimeFeed`]. The store subscribes when
//! the instrument's first series is created and unsubscribes when its last
//! one is released.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{CandlePlotData, ConsolidationReport};
use crate::BarfeedError;
use crate::models::trade::Tick;
use crate::models::{BrokerId, CandleRequest, CandleResponse, InstrumentKey, PlotKey};
use crate::realtime::{FeedReceiver, RealtimeFeed};

/// Identifies one chart on screen.
pub type ChartId = u64;

struct PlotEntry {
    plot: Arc<CandlePlotData>,
    refs: usize,
}

struct InstrumentEntry {
    symbol: String,
    plots: usize,
    /// Whether the store opened the trade channel and must close it.
    owns_subscription: bool,
}

#[derive(Default)]
struct StoreInner {
    plots: HashMap<PlotKey, PlotEntry>,
    charts: HashMap<ChartId, PlotKey>,
    instruments: HashMap<InstrumentKey, InstrumentEntry>,
    feeds: HashMap<BrokerId, Arc<RealtimeFeed>>,
}

/// Result of [`PriceDataStore::attach_chart`].
pub struct Attachment {
    pub plot: Arc<CandlePlotData>,
    /// Trades for a newly created series. The caller drives them into
    /// [`plot`](Self::plot), usually with
    /// [`run_tick_ingest`](crate::refresh::run_tick_ingest). `None` when the
    /// series already existed or its broker has no registered feed.
    pub trades: Option<FeedReceiver<Tick>>,
}

/// Reference-counted registry of candle series keyed by broker, instrument
/// and resolution.
///
/// A series is created when the first chart attaches to it and closed when
/// the last one detaches. Refresh results are applied outside the store
/// lock; only closing a released series happens under it.
pub struct PriceDataStore {
    inner: Mutex<StoreInner>,
    lookback: i64,
}

impl PriceDataStore {
    /// Creates an empty store; refresh queries cover `lookback` periods.
    pub fn new(lookback: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            lookback: i64::try_from(lookback).unwrap_or(i64::MAX),
        }
    }

    /// Uses `feed` for the trade subscriptions of `broker`'s instruments.
    ///
    /// Only series created afterwards are linked to it.
    pub fn register_feed(&self, broker: BrokerId, feed: Arc<RealtimeFeed>) {
        info!(%broker, "registered realtime feed");
        self.inner.lock().feeds.insert(broker, feed);
    }

    /// Attaches `chart` to the series for `key`, creating it if needed.
    ///
    /// `symbol` is the instrument's ticker on the realtime feed. A chart that
    /// was showing another series is moved off it after the new one is
    /// linked, so switching resolution keeps the instrument subscribed.
    pub fn attach_chart(&self, chart: ChartId, key: PlotKey, symbol: &str) -> Attachment {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let previous = inner.charts.get(&chart).cloned();
        if previous.as_ref() == Some(&key) {
            let Some(entry) = inner.plots.get(&key) else {
                panic!("chart {chart} references missing plot {key}");
            };
            return Attachment {
                plot: Arc::clone(&entry.plot),
                trades: None,
            };
        }

        let attachment = if let Some(entry) = inner.plots.get_mut(&key) {
            entry.refs += 1;
            Attachment {
                plot: Arc::clone(&entry.plot),
                trades: None,
            }
        } else {
            info!(plot = %key, symbol, "creating price data");
            let plot = Arc::new(CandlePlotData::new(key.to_string()));
            inner.plots.insert(
                key.clone(),
                PlotEntry {
                    plot: Arc::clone(&plot),
                    refs: 1,
                },
            );
            let trades = inner.link_instrument(&key, symbol);
            Attachment { plot, trades }
        };

        inner.charts.insert(chart, key);
        if let Some(previous) = previous {
            inner.release(chart, &previous);
        }
        attachment
    }

    /// Detaches `chart`; returns `true` if its series was closed as a result.
    ///
    /// # Panics
    ///
    /// Panics if `chart` is not attached. Callers own chart bookkeeping, so
    /// this indicates a bug rather than bad input.
    pub fn detach_chart(&self, chart: ChartId) -> bool {
        let mut inner = self.inner.lock();
        let Some(key) = inner.charts.remove(&chart) else {
            panic!("detach of chart {chart} that was never attached");
        };
        inner.release(chart, &key)
    }

    /// The series for `key`, if any chart shows it.
    pub fn plot(&self, key: &PlotKey) -> Option<Arc<CandlePlotData>> {
        self.inner
            .lock()
            .plots
            .get(key)
            .map(|entry| Arc::clone(&entry.plot))
    }

    /// Keys of all live series.
    pub fn keys(&self) -> Vec<PlotKey> {
        self.inner.lock().plots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().plots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().plots.is_empty()
    }

    /// One candle query per distinct series shown by any chart.
    pub fn sweep_requests(&self, now: DateTime<Utc>) -> Vec<CandleRequest> {
        let unique: BTreeSet<PlotKey> = self.inner.lock().charts.values().cloned().collect();

        unique
            .into_iter()
            .map(|key| {
                let from = key
                    .resolution
                    .sub_periods(now, self.lookback)
                    .unwrap_or(now);
                CandleRequest {
                    broker: key.broker,
                    figi: key.figi,
                    resolution: key.resolution,
                    from,
                    to: now,
                }
            })
            .collect()
    }

    /// Routes a broker answer to its series.
    ///
    /// Failures are recorded on the series for display and logged; they are
    /// retried by the next sweep.
    pub fn apply_response(&self, response: CandleResponse) -> Option<ConsolidationReport> {
        let key = response.key();
        let Some(plot) = self.plot(&key) else {
            debug!(plot = %key, "dropping candles for detached plot");
            return None;
        };

        match response.result {
            Ok(candles) => {
                plot.clear_error();
                Some(plot.update_consolidated_candles(key.resolution, candles))
            }
            Err(message) => {
                warn!(plot = %key, error = %message, "candle query failed");
                plot.record_error(message);
                None
            }
        }
    }
}

impl StoreInner {
    /// Counts a new series against its instrument and hands it a trade
    /// receiver, subscribing on the instrument's first series.
    fn link_instrument(&mut self, key: &PlotKey, symbol: &str) -> Option<FeedReceiver<Tick>> {
        let instrument = key.instrument();
        let feed = self.feeds.get(&instrument.broker).cloned();

        if let Some(entry) = self.instruments.get_mut(&instrument) {
            entry.plots += 1;
            let feed = feed?;
            let trades = feed.trades().receiver(&entry.symbol);
            if trades.is_none() {
                warn!(%instrument, symbol = %entry.symbol, "trade channel is gone, series gets no ticks");
            }
            return trades;
        }

        let mut entry = InstrumentEntry {
            symbol: symbol.to_string(),
            plots: 1,
            owns_subscription: false,
        };
        let trades = match feed {
            None => {
                debug!(%instrument, "no realtime feed for broker");
                None
            }
            Some(feed) => match feed.trades().subscribe(symbol) {
                Ok(trades) => {
                    entry.owns_subscription = true;
                    Some(trades)
                }
                Err(BarfeedError::AlreadySubscribed(_)) => {
                    debug!(%instrument, symbol, "joining existing trade channel");
                    feed.trades().receiver(symbol)
                }
                Err(e) => {
                    warn!(%instrument, symbol, error = %e, "trade subscribe failed");
                    None
                }
            },
        };
        self.instruments.insert(instrument, entry);
        trades
    }

    /// Drops one chart reference from the series `key`, closing it on the
    /// last one. Returns `true` if the series was closed.
    fn release(&mut self, chart: ChartId, key: &PlotKey) -> bool {
        let Some(entry) = self.plots.get_mut(key) else {
            panic!("chart {chart} references missing plot {key}");
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return false;
        }

        if let Some(entry) = self.plots.remove(key) {
            entry.plot.close();
        }
        info!(plot = %key, "released price data");
        self.unlink_instrument(key);
        true
    }

    /// Unsubscribes the instrument of `key` once none of its series remain.
    fn unlink_instrument(&mut self, key: &PlotKey) {
        let instrument = key.instrument();
        let Some(entry) = self.instruments.get_mut(&instrument) else {
            panic!("plot {key} has no instrument entry");
        };
        entry.plots -= 1;
        if entry.plots > 0 {
            return;
        }

        if let Some(entry) = self.instruments.remove(&instrument)
            && entry.owns_subscription
            && let Some(feed) = self.feeds.get(&instrument.broker)
        {
            match feed.trades().unsubscribe(&entry.symbol) {
                Ok(()) => info!(%instrument, symbol = %entry.symbol, "unsubscribed instrument"),
                Err(e) => debug!(%instrument, error = %e, "instrument already unsubscribed"),
            }
        }
    }
}
