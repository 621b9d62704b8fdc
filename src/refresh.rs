//! Background tasks that keep candle series current.
//!
//! - [`run_refresh_loop`] periodically asks brokers for fresh candles
//! - [`run_response_loop`] merges broker answers into the store
//! - [`run_tick_ingest`] feeds one symbol's trades into its series

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conditions::classify;
use crate::models::trade::Tick;
use crate::models::{CandleRequest, CandleResponse};
use crate::plot::{CandlePlotData, PriceDataStore, TickDisposition};
use crate::realtime::FeedReceiver;

/// Shortest period accepted by [`run_refresh_loop`].
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Sends one candle query per displayed series every `every`.
///
/// Runs until `cancel` fires or the request channel closes. The first sweep
/// happens immediately. A zero `every` is raised to [`MIN_REFRESH_INTERVAL`].
pub async fn run_refresh_loop(
    store: Arc<PriceDataStore>,
    requests: mpsc::Sender<CandleRequest>,
    every: Duration,
    cancel: CancellationToken,
) {
    let every = if every.is_zero() {
        warn!(
            min = ?MIN_REFRESH_INTERVAL,
            "zero refresh interval, using the minimum"
        );
        MIN_REFRESH_INTERVAL
    } else {
        every
    };
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("refresh loop cancelled");
                return;
            }
            _ = interval.tick() => {}
        }

        let sweep = store.sweep_requests(Utc::now());
        debug!(requests = sweep.len(), "refreshing candle series");
        for request in sweep {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("refresh loop cancelled");
                    return;
                }
                sent = requests.send(request) => {
                    if sent.is_err() {
                        warn!("candle request channel closed, stopping refresh loop");
                        return;
                    }
                }
            }
        }
    }
}

/// Applies broker answers to the store until cancelled or the channel closes.
pub async fn run_response_loop(
    store: Arc<PriceDataStore>,
    mut responses: mpsc::Receiver<CandleResponse>,
    cancel: CancellationToken,
) {
    loop {
        let response = tokio::select! {
            () = cancel.cancelled() => {
                info!("response loop cancelled");
                return;
            }
            response = responses.recv() => match response {
                Some(response) => response,
                None => {
                    debug!("candle response channel closed");
                    return;
                }
            },
        };

        let key = response.key();
        if let Some(report) = store.apply_response(response)
            && !report.mismatched.is_empty()
        {
            warn!(
                plot = %key,
                mismatched = report.mismatched.len(),
                "realtime candles disagreed with broker data"
            );
        }
    }
}

/// Folds every trade from `trades` into `plot`.
///
/// Returns when the channel closes, after marking the series stale.
pub async fn run_tick_ingest(mut trades: FeedReceiver<Tick>, plot: Arc<CandlePlotData>) {
    let mut applied = 0u64;
    while let Some(tick) = trades.recv().await {
        let ctx = classify(&tick.tape, &tick.conditions);
        match plot.add_realtime_data(tick.timestamp, tick.price, tick.size, ctx) {
            TickDisposition::Applied => applied += 1,
            TickDisposition::Closed => {
                debug!(plot = plot.label(), "series closed, stopping tick ingest");
                return;
            }
            TickDisposition::NotSeeded | TickDisposition::Stale => {}
        }
    }

    info!(plot = plot.label(), applied, "trade channel closed");
    plot.mark_stale(true);
}
