//! OHLCV candle and resolution models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::BarfeedError;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_DAY: i64 = 24 * 60 * SECS_PER_MINUTE;
const SECS_PER_WEEK: i64 = 7 * SECS_PER_DAY;

/// 1970-01-01 was a Thursday; weeks start on the following Monday.
const WEEK_EPOCH_OFFSET: i64 = 4 * SECS_PER_DAY;

/// A single OHLCV bar.
///
/// `timestamp` is the start of the candle's period in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Fixed candle period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CandleResolution {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    OneDay,
    OneWeek,
    OneMonth,
}

impl CandleResolution {
    /// All resolutions, shortest first.
    pub const ALL: [CandleResolution; 8] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::OneDay,
        Self::OneWeek,
        Self::OneMonth,
    ];

    /// Short label used in logs and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1mo",
        }
    }

    /// Period length in seconds, or `None` for calendar months.
    fn fixed_secs(self) -> Option<i64> {
        match self {
            Self::OneMinute => Some(SECS_PER_MINUTE),
            Self::FiveMinutes => Some(5 * SECS_PER_MINUTE),
            Self::FifteenMinutes => Some(15 * SECS_PER_MINUTE),
            Self::ThirtyMinutes => Some(30 * SECS_PER_MINUTE),
            Self::OneHour => Some(60 * SECS_PER_MINUTE),
            Self::OneDay => Some(SECS_PER_DAY),
            Self::OneWeek => Some(SECS_PER_WEEK),
            Self::OneMonth => None,
        }
    }

    /// Number of whole periods between the epoch grid and `ts`.
    ///
    /// Two timestamps in the same period share a time unit, and consecutive
    /// periods differ by exactly one regardless of month or week length.
    pub fn time_unit(self, ts: DateTime<Utc>) -> i64 {
        match self {
            Self::OneMonth => i64::from(ts.year()) * 12 + i64::from(ts.month0()),
            Self::OneWeek => (ts.timestamp() - WEEK_EPOCH_OFFSET).div_euclid(SECS_PER_WEEK),
            _ => {
                let step = self.fixed_secs().unwrap_or(SECS_PER_MINUTE);
                ts.timestamp().div_euclid(step)
            }
        }
    }

    /// Inverse of [`time_unit`](Self::time_unit): the start of the given period.
    pub fn from_time_unit(self, unit: i64) -> Option<DateTime<Utc>> {
        match self {
            Self::OneMonth => {
                let year = i32::try_from(unit.div_euclid(12)).ok()?;
                let month = u32::try_from(unit.rem_euclid(12)).ok()? + 1;
                let date = NaiveDate::from_ymd_opt(year, month, 1)?;
                Some(date.and_hms_opt(0, 0, 0)?.and_utc())
            }
            Self::OneWeek => {
                let secs = unit.checked_mul(SECS_PER_WEEK)?.checked_add(WEEK_EPOCH_OFFSET)?;
                DateTime::from_timestamp(secs, 0)
            }
            _ => {
                let step = self.fixed_secs().unwrap_or(SECS_PER_MINUTE);
                DateTime::from_timestamp(unit.checked_mul(step)?, 0)
            }
        }
    }

    /// Start of the period containing `ts`.
    pub fn period_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.from_time_unit(self.time_unit(ts)).unwrap_or(ts)
    }

    /// Start of the period `n` periods after the one containing `ts`.
    pub fn add_periods(self, ts: DateTime<Utc>, n: i64) -> Option<DateTime<Utc>> {
        self.from_time_unit(self.time_unit(ts).checked_add(n)?)
    }

    /// Start of the period `n` periods before the one containing `ts`.
    pub fn sub_periods(self, ts: DateTime<Utc>, n: i64) -> Option<DateTime<Utc>> {
        self.from_time_unit(self.time_unit(ts).checked_sub(n)?)
    }

    /// Signed number of periods from the period of `from` to that of `to`.
    pub fn periods_between(self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        self.time_unit(to) - self.time_unit(from)
    }
}

impl fmt::Display for CandleResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleResolution {
    type Err = BarfeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| BarfeedError::Config(format!("unknown candle resolution: {s}")))
    }
}
