//! Shared test utilities.

#![allow(dead_code)]

use std::sync::Once;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use barfeed::models::candle::Candle;

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness so it shows on failure.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// 2024-03-14 09:`min`:`sec` UTC.
pub fn at(min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 9, min, sec).unwrap()
}

pub fn candle(min: u32, open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Candle {
    Candle {
        timestamp: at(min, 0),
        open,
        high,
        low,
        close,
        volume,
    }
}

/// A one-minute bar with every price at `price`.
pub fn flat(min: u32, price: Decimal) -> Candle {
    candle(min, price, price, price, price, Decimal::ONE_HUNDRED)
}

/// Flat bars for each minute in `mins`.
pub fn bars(mins: std::ops::RangeInclusive<u32>, price: Decimal) -> Vec<Candle> {
    mins.map(|m| flat(m, price)).collect()
}
