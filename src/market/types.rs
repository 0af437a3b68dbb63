//! Stock identity and K-line query types

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stock identity: exchange market prefix plus instrument code
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stock {
    /// Market prefix, e.g. "SH"
    pub market: String,
    /// Instrument code, e.g. "600000"
    pub code: String,
}

impl Stock {
    /// Create a stock from market prefix and code
    pub fn new(market: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            code: code.into(),
        }
    }

    /// A stock with neither market nor code set is the null stock
    pub fn is_null(&self) -> bool {
        self.market.is_empty() && self.code.is_empty()
    }

    /// Combined identifier, e.g. "SH600000"
    pub fn market_code(&self) -> String {
        format!("{}{}", self.market, self.code)
    }
}

impl fmt::Display for Stock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.market, self.code)
    }
}

/// K-line bar granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KType {
    /// 1-minute bars
    Min,
    /// 5-minute bars
    Min5,
    /// 15-minute bars
    Min15,
    /// 30-minute bars
    Min30,
    /// 60-minute bars
    Min60,
    /// Daily bars
    Day,
    /// Weekly bars
    Week,
}

impl KType {
    /// Bar period in minutes
    pub fn minutes(&self) -> i64 {
        match self {
            KType::Min => 1,
            KType::Min5 => 5,
            KType::Min15 => 15,
            KType::Min30 => 30,
            KType::Min60 => 60,
            KType::Day => 24 * 60,
            KType::Week => 7 * 24 * 60,
        }
    }

    /// Bar period as a duration
    pub fn period(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }
}

impl fmt::Display for KType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KType::Min => "min",
            KType::Min5 => "min5",
            KType::Min15 => "min15",
            KType::Min30 => "min30",
            KType::Min60 => "min60",
            KType::Day => "day",
            KType::Week => "week",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for KType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(KType::Min),
            "min5" => Ok(KType::Min5),
            "min15" => Ok(KType::Min15),
            "min30" => Ok(KType::Min30),
            "min60" => Ok(KType::Min60),
            "day" => Ok(KType::Day),
            "week" => Ok(KType::Week),
            other => Err(anyhow::anyhow!("Unknown K-line granularity: {}", other)),
        }
    }
}

/// A date-bounded K-line query at a given granularity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KQuery {
    /// First date (inclusive)
    pub start: NaiveDate,
    /// Last date (inclusive)
    pub end: NaiveDate,
    /// Bar granularity
    pub ktype: KType,
}

impl KQuery {
    /// Create a query over a date range
    pub fn new(start: NaiveDate, end: NaiveDate, ktype: KType) -> Self {
        Self { start, end, ktype }
    }
}

/// One K-line bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KRecord {
    /// Bar timestamp
    pub datetime: NaiveDateTime,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
    /// Traded volume
    pub volume: Decimal,
    /// Traded amount
    pub amount: Decimal,
}
