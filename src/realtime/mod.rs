//! Realtime trade and quote fan-out.
//!
//! This module is organized by concern:
//! - [`channel`] - Per-symbol broadcast receivers that drop the oldest item
//! - [`registry`] - Symbol to channel map with deferred close
//!
//! [`RealtimeFeed`] sits between a broker's feed-reading task and the
//! per-instrument consumers: the broker client hands it batches of inbound
//! events, and subscribers receive them on their own channels.

pub mod channel;
pub mod registry;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::models::quote::Quote;
use crate::models::trade::Tick;

pub use channel::{Delivery, FeedReceiver};
pub use registry::ChannelRegistry;

/// Default buffer size of each per-symbol channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// One inbound realtime message.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Trade(Tick),
    Quote(Quote),
}

/// Receivers handed to a new subscriber.
pub struct Subscription {
    pub symbol: String,
    pub trades: FeedReceiver<Tick>,
    pub quotes: FeedReceiver<Quote>,
}

/// A subscription change requested by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionRequest {
    Subscribe(String),
    Unsubscribe(String),
}

/// Acknowledgement of a [`SubscriptionRequest`].
pub enum SubscriptionResponse {
    Subscribed(Result<Subscription>),
    Unsubscribed {
        symbol: String,
        result: Result<()>,
    },
}

/// Trade and quote registries of one broker connection.
pub struct RealtimeFeed {
    trades: ChannelRegistry<Tick>,
    quotes: ChannelRegistry<Quote>,
}

impl RealtimeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            trades: ChannelRegistry::new("trades", capacity),
            quotes: ChannelRegistry::new("quotes", capacity),
        }
    }

    pub fn trades(&self) -> &ChannelRegistry<Tick> {
        &self.trades
    }

    pub fn quotes(&self) -> &ChannelRegistry<Quote> {
        &self.quotes
    }

    /// Opens trade and quote channels for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`BarfeedError::AlreadySubscribed`](crate::BarfeedError::AlreadySubscribed)
    /// if either channel already exists; nothing is registered in that case.
    pub fn subscribe(&self, symbol: &str) -> Result<Subscription> {
        let trades = self.trades.subscribe(symbol)?;
        let quotes = match self.quotes.subscribe(symbol) {
            Ok(rx) => rx,
            Err(e) => {
                let _ = self.trades.unsubscribe(symbol);
                return Err(e);
            }
        };
        Ok(Subscription {
            symbol: symbol.to_string(),
            trades,
            quotes,
        })
    }

    /// Removes both channels of `symbol`; they close after the current batch.
    ///
    /// # Errors
    ///
    /// Returns [`BarfeedError::NotSubscribed`](crate::BarfeedError::NotSubscribed)
    /// if `symbol` has no trade channel.
    pub fn unsubscribe(&self, symbol: &str) -> Result<()> {
        self.trades.unsubscribe(symbol)?;
        if let Err(e) = self.quotes.unsubscribe(symbol) {
            warn!(symbol, error = %e, "quote channel missing during unsubscribe");
        }
        Ok(())
    }

    /// Fans out one inbound batch, then closes channels unsubscribed while
    /// it was in flight.
    pub fn dispatch_batch<I>(&self, events: I)
    where
        I: IntoIterator<Item = FeedEvent>,
    {
        for event in events {
            match event {
                FeedEvent::Trade(tick) => {
                    let symbol = tick.symbol.clone();
                    self.trades.add_new_data(&symbol, tick);
                }
                FeedEvent::Quote(quote) => {
                    let symbol = quote.symbol.clone();
                    self.quotes.add_new_data(&symbol, quote);
                }
            }
        }
        self.trades.finish_batch();
        self.quotes.finish_batch();
    }

    /// Closes every channel after the underlying connection dropped.
    pub fn connection_lost(&self) {
        warn!("realtime connection lost, closing all channels");
        self.trades.clear();
        self.quotes.clear();
    }
}

/// Serves subscription requests until cancelled or either channel closes.
pub async fn run_subscription_loop(
    feed: &RealtimeFeed,
    mut requests: mpsc::Receiver<SubscriptionRequest>,
    responses: mpsc::Sender<SubscriptionResponse>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            () = cancel.cancelled() => {
                info!("subscription loop cancelled");
                return;
            }
            request = requests.recv() => match request {
                Some(request) => request,
                None => {
                    debug!("subscription request channel closed");
                    return;
                }
            },
        };

        let response = match request {
            SubscriptionRequest::Subscribe(symbol) => {
                SubscriptionResponse::Subscribed(feed.subscribe(&symbol))
            }
            SubscriptionRequest::Unsubscribe(symbol) => {
                let result = feed.unsubscribe(&symbol);
                SubscriptionResponse::Unsubscribed { symbol, result }
            }
        };

        if responses.send(response).await.is_err() {
            debug!("subscription response channel closed");
            return;
        }
    }
}
