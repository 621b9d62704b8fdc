//! Symbol to channel registry with deferred close.
//!
//! The map is split into independently locked shards so the feed's fan-out
//! and subscribe/unsubscribe callers for different symbols do not contend
//! on one lock.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::channel::{Delivery, FeedReceiver};
use crate::{BarfeedError, Result};

const SHARD_COUNT: usize = 16;

type Shard<T> = RwLock<HashMap<String, broadcast::Sender<T>>>;

/// Per-symbol realtime channels for one kind of message.
pub struct ChannelRegistry<T> {
    shards: Box<[Shard<T>]>,
    /// Channels unsubscribed since the last completed batch.
    closing: Mutex<Vec<(String, broadcast::Sender<T>)>>,
    capacity: usize,
    kind: &'static str,
}

impl<T: Clone> ChannelRegistry<T> {
    /// Creates an empty registry whose channels buffer `capacity` items.
    /// `kind` labels log output (e.g. `"trades"`).
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            closing: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            kind,
        }
    }

    fn shard(&self, symbol: &str) -> &Shard<T> {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        let idx = (hasher.finish() % SHARD_COUNT as u64) as usize;
        &self.shards[idx]
    }

    /// Registers a channel for `symbol` and returns its first receiver.
    ///
    /// # Errors
    ///
    /// Returns [`BarfeedError::AlreadySubscribed`] if `symbol` already has a
    /// channel.
    pub fn subscribe(&self, symbol: &str) -> Result<FeedReceiver<T>> {
        let mut shard = self.shard(symbol).write();
        if shard.contains_key(symbol) {
            return Err(BarfeedError::AlreadySubscribed(symbol.to_string()));
        }

        let (tx, rx) = broadcast::channel(self.capacity);
        shard.insert(symbol.to_string(), tx);
        info!(kind = self.kind, symbol, "subscribed");
        Ok(FeedReceiver::new(symbol, self.kind, rx))
    }

    /// Another receiver on the existing channel of `symbol`.
    ///
    /// It sees items delivered from now on.
    pub fn receiver(&self, symbol: &str) -> Option<FeedReceiver<T>> {
        self.shard(symbol)
            .read()
            .get(symbol)
            .map(|tx| FeedReceiver::new(symbol, self.kind, tx.subscribe()))
    }

    /// Removes the channel for `symbol`.
    ///
    /// The channel stops receiving immediately but is only closed by the next
    /// [`finish_batch`](Self::finish_batch), after the in-flight batch has
    /// been dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`BarfeedError::NotSubscribed`] if `symbol` has no channel.
    pub fn unsubscribe(&self, symbol: &str) -> Result<()> {
        let channel = self
            .shard(symbol)
            .write()
            .remove(symbol)
            .ok_or_else(|| BarfeedError::NotSubscribed(symbol.to_string()))?;

        self.closing.lock().push((symbol.to_string(), channel));
        info!(kind = self.kind, symbol, "unsubscribed");
        Ok(())
    }

    /// Delivers `item` to every receiver of `symbol`.
    ///
    /// Never blocks: receivers that fall behind lose their oldest items
    /// instead. A channel whose receivers are all gone is removed.
    pub fn add_new_data(&self, symbol: &str, item: T) -> Delivery {
        let shard = self.shard(symbol);
        {
            let channels = shard.read();
            let Some(tx) = channels.get(symbol) else {
                debug!(kind = self.kind, symbol, "no subscriber, dropping update");
                return Delivery::NoSubscriber;
            };
            if let Ok(receivers) = tx.send(item) {
                return Delivery::Delivered(receivers);
            }
        }

        let mut channels = shard.write();
        if channels
            .get(symbol)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(symbol);
            warn!(kind = self.kind, symbol, "all receivers gone, removed channel");
        }
        Delivery::Closed
    }

    /// Closes channels unsubscribed during the batch that just completed.
    pub fn finish_batch(&self) {
        let closing = std::mem::take(&mut *self.closing.lock());
        for (symbol, channel) in closing {
            drop(channel);
            debug!(kind = self.kind, symbol, "closed channel");
        }
    }

    /// Closes and removes every channel.
    pub fn clear(&self) {
        let mut closed = 0usize;
        for shard in self.shards.iter() {
            closed += shard.write().drain().count();
        }
        self.finish_batch();
        info!(kind = self.kind, closed, "cleared all channels");
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.shard(symbol).read().contains_key(symbol)
    }

    /// Subscribed symbols, in no particular order.
    pub fn symbols(&self) -> Vec<String> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }
}
