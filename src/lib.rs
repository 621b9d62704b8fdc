//! Candle and realtime market data plumbing for charting front ends.
//!
//! Reconciles periodically re-queried broker candles with a live trade feed
//! into one consistent series per (broker, instrument, resolution), fans the
//! feed out to per-symbol subscribers, and keeps broker HTTP traffic inside
//! its rate limits.

pub mod cache;
pub mod conditions;
pub mod config;
pub mod error;
pub mod models;
pub mod plot;
pub mod rate_limit;
pub mod realtime;
pub mod refresh;

pub use error::{BarfeedError, Result};
