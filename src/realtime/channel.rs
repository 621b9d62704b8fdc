//! Per-symbol delivery over a bounded broadcast channel.
//!
//! The sending half lives in the registry; every consumer of a symbol holds
//! its own [`FeedReceiver`]. When a receiver falls behind, the channel
//! overwrites the oldest buffered item, so a slow consumer sees a gap rather
//! than a backlog. Dropping the sender closes the channel once the buffered
//! items have been read.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

/// Result of delivering one item through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for this many receivers.
    Delivered(usize),
    /// Nobody is subscribed to the symbol; the item was dropped.
    NoSubscriber,
    /// Every receiver was gone; the item was dropped and the channel removed.
    Closed,
}

/// Receiving half of one symbol's channel.
#[derive(Debug)]
pub struct FeedReceiver<T> {
    symbol: String,
    kind: &'static str,
    rx: broadcast::Receiver<T>,
    lagged: u64,
}

impl<T: Clone> FeedReceiver<T> {
    pub(super) fn new(symbol: &str, kind: &'static str, rx: broadcast::Receiver<T>) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
            rx,
            lagged: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Items this receiver lost to overwrites so far.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    fn record_lag(&mut self, skipped: u64) {
        self.lagged += skipped;
        warn!(
            kind = self.kind,
            symbol = %self.symbol,
            skipped,
            "receiver fell behind, oldest updates evicted"
        );
    }

    /// Waits for the next item; returns `None` once the channel is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(item) => return Some(item),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Takes the next buffered item without waiting.
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] if nothing is buffered, or
    /// [`TryRecvError::Closed`] once the channel is closed and drained.
    /// Lag is logged and skipped, never returned.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        loop {
            match self.rx.try_recv() {
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                other => return other,
            }
        }
    }
}
