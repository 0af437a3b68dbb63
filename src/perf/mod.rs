//! Trade accounting and performance statistics
//!
//! `TradeManager` holds the simulated account state a trading system produces;
//! `Performance` derives named statistics from it, truncated at a caller-supplied
//! as-of instant so still-open activity past the query window never biases a
//! backtest ranking.

use crate::market::Stock;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One realized trade produced by a simulation run
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    /// Close time of the trade
    pub datetime: NaiveDateTime,
    /// Instrument traded
    pub stock: Stock,
    /// Realized profit or loss
    pub realized_pnl: Decimal,
}

/// Simulated account state: initial cash plus chronological trade records
#[derive(Debug, Clone, Default)]
pub struct TradeManager {
    initial_cash: Decimal,
    trades: Vec<TradeRecord>,
}

impl TradeManager {
    /// Create an account with the given starting cash
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            trades: Vec::new(),
        }
    }

    /// Starting cash
    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    /// Append a realized trade
    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
    }

    /// All recorded trades
    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }
}

/// Every statistic name `Performance` produces, in report order
pub const STATISTIC_KEYS: &[&str] = &[
    "total_pnl",
    "total_return_pct",
    "annual_return_pct",
    "win_rate_pct",
    "profit_factor",
    "max_drawdown_pct",
    "trade_count",
];

/// Named performance statistics computed from a trade manager
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Performance {
    values: BTreeMap<String, Decimal>,
}

impl Performance {
    /// Compute statistics from trades dated at or before `as_of`
    pub fn statistics(tm: &TradeManager, as_of: NaiveDateTime) -> Self {
        let trades: Vec<&TradeRecord> = tm
            .trades()
            .iter()
            .filter(|t| t.datetime <= as_of)
            .collect();

        let hundred = Decimal::from(100);
        let total_pnl: Decimal = trades.iter().map(|t| t.realized_pnl).sum();
        let trade_count = Decimal::from(trades.len() as u64);

        let total_return_pct = total_pnl
            .checked_div(tm.initial_cash())
            .map(|r| r * hundred)
            .unwrap_or_default();

        let annual_return_pct = trades
            .first()
            .map(|first| {
                let span_days = (as_of.date() - first.datetime.date()).num_days().max(1);
                total_return_pct * Decimal::from(365)
                    / Decimal::from(span_days)
            })
            .unwrap_or_default();

        let wins = trades.iter().filter(|t| t.realized_pnl > Decimal::ZERO).count();
        let win_rate_pct = Decimal::from(wins as u64)
            .checked_div(trade_count)
            .map(|r| r * hundred)
            .unwrap_or_default();

        let gross_profit: Decimal = trades
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|p| *p > Decimal::ZERO)
            .sum();
        let gross_loss: Decimal = trades
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|p| *p < Decimal::ZERO)
            .map(|p| -p)
            .sum();
        // With no losing trades the factor degenerates to the gross profit itself
        let profit_factor = gross_profit.checked_div(gross_loss).unwrap_or(gross_profit);

        let mut equity = tm.initial_cash();
        let mut peak = equity;
        let mut max_drawdown_pct = Decimal::ZERO;
        for t in &trades {
            equity += t.realized_pnl;
            if equity > peak {
                peak = equity;
            }
            let dd = (peak - equity)
                .checked_div(peak)
                .map(|r| r * hundred)
                .unwrap_or_default();
            if dd > max_drawdown_pct {
                max_drawdown_pct = dd;
            }
        }

        let mut values = BTreeMap::new();
        values.insert("total_pnl".into(), total_pnl);
        values.insert("total_return_pct".into(), total_return_pct);
        values.insert("annual_return_pct".into(), annual_return_pct);
        values.insert("win_rate_pct".into(), win_rate_pct);
        values.insert("profit_factor".into(), profit_factor);
        values.insert("max_drawdown_pct".into(), max_drawdown_pct);
        values.insert("trade_count".into(), trade_count);
        Self { values }
    }

    /// True when `key` names a statistic this type produces
    pub fn exists(key: &str) -> bool {
        STATISTIC_KEYS.contains(&key)
    }

    /// Look up a computed statistic
    pub fn get(&self, key: &str) -> Option<Decimal> {
        self.values.get(key).copied()
    }

    /// All computed statistics by name
    pub fn values(&self) -> &BTreeMap<String, Decimal> {
        &self.values
    }

    /// Consume into the named-value map
    pub fn into_values(self) -> BTreeMap<String, Decimal> {
        self.values
    }
}
