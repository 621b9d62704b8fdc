//! Shared data models.
//!
//! Contains the candle and tick types exchanged with broker clients, plus
//! the request/response envelopes used on the candle query channels.

pub mod asset;
pub mod candle;
pub mod quote;
pub mod trade;

use std::fmt;

use chrono::{DateTime, Utc};

use candle::{Candle, CandleResolution};

/// Identifies a broker connection (e.g. `"alpaca"`, `"tinkoff"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrokerId(pub String);

impl BrokerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One instrument on one broker; all of its candle series share a trade
/// subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentKey {
    pub broker: BrokerId,
    pub figi: String,
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.broker, self.figi)
    }
}

/// Key of one candle series: a broker's instrument at one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlotKey {
    pub broker: BrokerId,
    pub figi: String,
    pub resolution: CandleResolution,
}

impl PlotKey {
    pub fn new(broker: BrokerId, figi: impl Into<String>, resolution: CandleResolution) -> Self {
        Self {
            broker,
            figi: figi.into(),
            resolution,
        }
    }

    pub fn instrument(&self) -> InstrumentKey {
        InstrumentKey {
            broker: self.broker.clone(),
            figi: self.figi.clone(),
        }
    }
}

impl fmt::Display for PlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.broker, self.figi, self.resolution)
    }
}

/// A candle query sent to a broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleRequest {
    pub broker: BrokerId,
    pub figi: String,
    pub resolution: CandleResolution,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl CandleRequest {
    /// The series this request refreshes.
    pub fn key(&self) -> PlotKey {
        PlotKey::new(self.broker.clone(), self.figi.clone(), self.resolution)
    }
}

/// A broker's answer to a [`CandleRequest`].
///
/// Candles are ordered oldest first; the last one may still be forming.
#[derive(Debug, Clone)]
pub struct CandleResponse {
    pub broker: BrokerId,
    pub figi: String,
    pub resolution: CandleResolution,
    pub result: std::result::Result<Vec<Candle>, String>,
}

impl CandleResponse {
    /// The series this response belongs to.
    pub fn key(&self) -> PlotKey {
        PlotKey::new(self.broker.clone(), self.figi.clone(), self.resolution)
    }
}
