//! Instrument universe entries.

use serde::{Deserialize, Serialize};

/// A tradable instrument as listed by a broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Financial Instrument Global Identifier, the cross-broker key.
    pub figi: String,
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub tradable: bool,
}
