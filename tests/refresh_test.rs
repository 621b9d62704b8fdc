//! Background refresh and tick ingest tasks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use barfeed::models::candle::CandleResolution;
use barfeed::models::trade::Tick;
use barfeed::models::{BrokerId, CandleResponse, PlotKey};
use barfeed::plot::{PlotState, PriceDataStore};
use barfeed::realtime::{FeedEvent, RealtimeFeed};
use barfeed::refresh::{
    MIN_REFRESH_INTERVAL, run_refresh_loop, run_response_loop, run_tick_ingest,
};

use common::{at, bars, init_tracing};

fn key() -> PlotKey {
    PlotKey::new(BrokerId::new("alpaca"), "BBG000B9XRY4", CandleResolution::OneMinute)
}

fn tick(min: u32, sec: u32, price: rust_decimal::Decimal, conditions: &[&str]) -> Tick {
    Tick {
        symbol: "AAPL".to_string(),
        timestamp: at(min, sec),
        price,
        size: dec!(10),
        tape: "C".to_string(),
        conditions: conditions.iter().map(|c| c.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_refresh_round_trip_seeds_plot() {
    init_tracing();
    let store = Arc::new(PriceDataStore::new(5));
    let plot = store.attach_chart(1, key(), "AAPL").plot;
    let (request_tx, mut request_rx) = mpsc::channel(8);
    let (response_tx, response_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    let refresh = tokio::spawn(run_refresh_loop(
        Arc::clone(&store),
        request_tx,
        Duration::from_secs(60),
        cancel.clone(),
    ));
    let responses = tokio::spawn(run_response_loop(
        Arc::clone(&store),
        response_rx,
        cancel.clone(),
    ));

    let request = request_rx.recv().await.expect("first sweep");
    assert_eq!(request.key(), key());

    response_tx
        .send(CandleResponse {
            broker: request.broker.clone(),
            figi: request.figi.clone(),
            resolution: request.resolution,
            result: Ok(bars(30..=34, dec!(100))),
        })
        .await
        .unwrap();
    drop(response_tx);
    responses.await.unwrap();

    assert_eq!(plot.state(), PlotState::Seeded);
    assert_eq!(plot.read_data().candles().len(), 4);

    cancel.cancel();
    refresh.await.unwrap();
}

#[tokio::test]
async fn test_failed_query_is_kept_on_plot() {
    init_tracing();
    let store = Arc::new(PriceDataStore::new(5));
    let plot = store.attach_chart(1, key(), "AAPL").plot;
    let (response_tx, response_rx) = mpsc::channel(8);

    let k = key();
    response_tx
        .send(CandleResponse {
            broker: k.broker,
            figi: k.figi,
            resolution: k.resolution,
            result: Err("502 Bad Gateway".to_string()),
        })
        .await
        .unwrap();
    drop(response_tx);
    run_response_loop(Arc::clone(&store), response_rx, CancellationToken::new()).await;

    assert_eq!(plot.last_error().as_deref(), Some("502 Bad Gateway"));
    assert_eq!(plot.state(), PlotState::Uninitialized);
}

#[tokio::test]
async fn test_refresh_loop_stops_when_requests_closed() {
    init_tracing();
    let store = Arc::new(PriceDataStore::new(5));
    store.attach_chart(1, key(), "AAPL");
    let (request_tx, request_rx) = mpsc::channel(1);
    drop(request_rx);

    tokio::time::timeout(
        Duration::from_secs(5),
        run_refresh_loop(store, request_tx, Duration::from_secs(60), CancellationToken::new()),
    )
    .await
    .expect("loop should exit on closed channel");
}

#[tokio::test(start_paused = true)]
async fn test_zero_refresh_interval_uses_minimum() {
    init_tracing();
    let store = Arc::new(PriceDataStore::new(5));
    store.attach_chart(1, key(), "AAPL");
    let (request_tx, mut request_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let start = tokio::time::Instant::now();

    let refresh = tokio::spawn(run_refresh_loop(
        Arc::clone(&store),
        request_tx,
        Duration::ZERO,
        cancel.clone(),
    ));

    request_rx.recv().await.expect("first sweep");
    request_rx.recv().await.expect("second sweep");
    assert!(start.elapsed() >= MIN_REFRESH_INTERVAL);

    cancel.cancel();
    refresh.await.unwrap();
}

#[tokio::test]
async fn test_tick_ingest_classifies_and_marks_stale_on_close() {
    init_tracing();
    let store = Arc::new(PriceDataStore::new(5));
    let plot = store.attach_chart(1, key(), "AAPL").plot;
    plot.update_consolidated_candles(CandleResolution::OneMinute, bars(30..=34, dec!(100)));

    let feed = RealtimeFeed::new(16);
    let subscription = feed.subscribe("AAPL").unwrap();
    let ingest = tokio::spawn(run_tick_ingest(subscription.trades, Arc::clone(&plot)));

    feed.dispatch_batch(vec![
        FeedEvent::Trade(tick(35, 1, dec!(101), &[])),
        // Odd lot: volume only.
        FeedEvent::Trade(tick(35, 2, dec!(150), &["I"])),
        FeedEvent::Trade(tick(35, 3, dec!(102), &["@"])),
    ]);
    feed.unsubscribe("AAPL").unwrap();
    feed.dispatch_batch(Vec::new());

    ingest.await.unwrap();

    assert!(plot.is_stale());
    let realtime = plot.read_realtime();
    let live = realtime
        .entries()
        .iter()
        .find(|e| e.timestamp == at(35, 0))
        .expect("09:35 entry");
    assert_eq!(live.open, Some(dec!(101)));
    assert_eq!(live.high, Some(dec!(102)));
    assert_eq!(live.close, Some(dec!(102)));
    assert_eq!(live.volume, dec!(30));
}
