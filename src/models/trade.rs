//! Realtime trade tick model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// A single executed trade as delivered by a broker's realtime feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
    /// Reporting network identifier (`"A"`, `"B"` or `"C"`).
    #[serde(default)]
    pub tape: String,
    /// Single-character sale condition codes attached to the trade.
    #[serde(default)]
    pub conditions: Vec<String>,
}
