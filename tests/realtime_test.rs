//! Realtime fan-out and the subscription request loop.

mod common;

use std::sync::Arc;

use rust_decimal_macros::dec;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use barfeed::BarfeedError;
use barfeed::models::quote::Quote;
use barfeed::models::trade::Tick;
use barfeed::realtime::{
    FeedEvent, RealtimeFeed, SubscriptionRequest, SubscriptionResponse, run_subscription_loop,
};

use common::{at, init_tracing};

fn trade(symbol: &str, sec: u32) -> FeedEvent {
    FeedEvent::Trade(Tick {
        symbol: symbol.to_string(),
        timestamp: at(35, sec),
        price: dec!(100),
        size: dec!(1),
        tape: "A".to_string(),
        conditions: Vec::new(),
    })
}

fn quote(symbol: &str) -> FeedEvent {
    FeedEvent::Quote(Quote {
        symbol: symbol.to_string(),
        timestamp: at(35, 0),
        bid: dec!(99.9),
        bid_size: dec!(3),
        ask: dec!(100.1),
        ask_size: dec!(4),
    })
}

#[test]
fn test_batch_reaches_only_its_symbol() {
    init_tracing();
    let feed = RealtimeFeed::new(8);
    let mut aapl = feed.subscribe("AAPL").unwrap();
    let mut msft = feed.subscribe("MSFT").unwrap();

    feed.dispatch_batch(vec![trade("AAPL", 1), quote("MSFT"), trade("TSLA", 2)]);

    assert_eq!(aapl.trades.try_recv().unwrap().timestamp, at(35, 1));
    assert!(matches!(aapl.trades.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(aapl.quotes.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(msft.quotes.try_recv().unwrap().mid(), dec!(100));
    assert!(matches!(msft.trades.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_duplicate_subscription_is_rejected() {
    init_tracing();
    let feed = RealtimeFeed::new(8);
    let _first = feed.subscribe("AAPL").unwrap();

    let result = feed.subscribe("AAPL");
    assert!(matches!(result, Err(BarfeedError::AlreadySubscribed(_))));
    assert_eq!(feed.trades().len(), 1);
    assert_eq!(feed.quotes().len(), 1);
}

#[test]
fn test_connection_loss_closes_every_channel() {
    init_tracing();
    let feed = RealtimeFeed::new(8);
    let mut aapl = feed.subscribe("AAPL").unwrap();
    let mut msft = feed.subscribe("MSFT").unwrap();

    feed.connection_lost();

    for subscription in [&mut aapl, &mut msft] {
        assert!(matches!(subscription.trades.try_recv(), Err(TryRecvError::Closed)));
        assert!(matches!(subscription.quotes.try_recv(), Err(TryRecvError::Closed)));
    }
    assert!(feed.trades().is_empty());
}

#[tokio::test]
async fn test_subscription_loop_round_trip() {
    init_tracing();
    let feed = Arc::new(RealtimeFeed::new(8));
    let (request_tx, request_rx) = mpsc::channel(4);
    let (response_tx, mut response_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();

    let server = {
        let feed = Arc::clone(&feed);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            run_subscription_loop(&feed, request_rx, response_tx, cancel).await;
        })
    };

    request_tx
        .send(SubscriptionRequest::Subscribe("AAPL".to_string()))
        .await
        .unwrap();
    let Some(SubscriptionResponse::Subscribed(Ok(mut subscription))) = response_rx.recv().await
    else {
        panic!("expected a subscription");
    };
    assert_eq!(subscription.symbol, "AAPL");

    feed.dispatch_batch(vec![trade("AAPL", 7)]);
    assert_eq!(subscription.trades.recv().await.unwrap().timestamp, at(35, 7));

    request_tx
        .send(SubscriptionRequest::Unsubscribe("MSFT".to_string()))
        .await
        .unwrap();
    match response_rx.recv().await {
        Some(SubscriptionResponse::Unsubscribed { symbol, result }) => {
            assert_eq!(symbol, "MSFT");
            assert!(matches!(result, Err(BarfeedError::NotSubscribed(_))));
        }
        _ => panic!("expected an unsubscribe acknowledgement"),
    }

    request_tx
        .send(SubscriptionRequest::Unsubscribe("AAPL".to_string()))
        .await
        .unwrap();
    assert!(matches!(
        response_rx.recv().await,
        Some(SubscriptionResponse::Unsubscribed { result: Ok(()), .. })
    ));
    feed.dispatch_batch(Vec::new());
    assert!(subscription.trades.recv().await.is_none());

    cancel.cancel();
    server.await.unwrap();
}

#[test]
fn test_slow_consumer_loses_oldest_updates() {
    init_tracing();
    let feed = RealtimeFeed::new(2);
    let mut aapl = feed.subscribe("AAPL").unwrap();

    feed.dispatch_batch((1..=5).map(|sec| trade("AAPL", sec)));

    assert_eq!(aapl.trades.try_recv().unwrap().timestamp, at(35, 4));
    assert_eq!(aapl.trades.try_recv().unwrap().timestamp, at(35, 5));
    assert!(matches!(aapl.trades.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(aapl.trades.lagged(), 3);
}

#[test]
fn test_abandoned_subscription_is_dropped_from_feed() {
    init_tracing();
    let feed = RealtimeFeed::new(8);
    let subscription = feed.subscribe("AAPL").unwrap();
    drop(subscription);

    feed.dispatch_batch(vec![trade("AAPL", 1), quote("AAPL")]);

    assert!(!feed.trades().is_subscribed("AAPL"));
    assert!(!feed.quotes().is_subscribed("AAPL"));
}
