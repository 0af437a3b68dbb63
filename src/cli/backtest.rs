//! Backtest command implementation
//!
//! Runs a grid of demo systems over the configured stock universe, prints
//! their statistics, and reports the optimal candidate under the configured
//! selection key.

use crate::config::Config;
use crate::evaluate::{evaluate_batch, select_optimal, EvaluationUnit};
use crate::market::{KQuery, KType, MarketCalendar, Stock};
use crate::perf::{TradeManager, TradeRecord, STATISTIC_KEYS};
use crate::system::TradingSystem;
use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct BacktestArgs {
    /// Start date (defaults to the configured start date)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// End date (defaults to today)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// K-line granularity
    #[arg(long, default_value = "day")]
    pub ktype: KType,

    /// Initial cash per candidate
    #[arg(long, default_value = "100000")]
    pub capital: Decimal,
}

/// Deterministic placeholder system; swing-trades on a fixed holding period
/// so that different periods produce different statistics.
#[derive(Clone)]
struct DemoSystem {
    name: String,
    hold_days: usize,
    initial_cash: Decimal,
    calendar: Arc<dyn MarketCalendar>,
    tm: TradeManager,
}

impl DemoSystem {
    fn new(
        hold_days: usize,
        initial_cash: Decimal,
        calendar: Arc<dyn MarketCalendar>,
    ) -> Self {
        Self {
            name: format!("demo-hold{}", hold_days),
            hold_days,
            initial_cash,
            calendar,
            tm: TradeManager::new(initial_cash),
        }
    }
}

impl TradingSystem for DemoSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, stock: &Stock, query: &KQuery) -> anyhow::Result<()> {
        self.tm = TradeManager::new(self.initial_cash);
        let dates = self.calendar.trading_dates(query);
        for (i, date) in dates.iter().enumerate().step_by(self.hold_days) {
            // Pseudo-random but reproducible swing in the -9..=11 tick range
            let swing = ((i * 37 + stock.code.len() * 11) % 21) as i64 - 9;
            let close = date.and_time(
                self.calendar
                    .session(&stock.market)
                    .map(|s| s.close2)
                    .unwrap_or_else(|_| chrono::NaiveTime::from_hms_opt(15, 0, 0).unwrap()),
            );
            self.tm.record_trade(TradeRecord {
                datetime: close,
                stock: stock.clone(),
                realized_pnl: Decimal::new(swing * 25, 1),
            });
        }
        Ok(())
    }

    fn trade_manager(&self) -> &TradeManager {
        &self.tm
    }

    fn clone_box(&self) -> Box<dyn TradingSystem> {
        Box::new(DemoSystem::new(
            self.hold_days,
            self.initial_cash,
            self.calendar.clone(),
        ))
    }
}

impl BacktestArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let start = self.start.unwrap_or(config.runtime.start_date);
        let end = self
            .end
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        anyhow::ensure!(start <= end, "Start date {} is after end date {}", start, end);

        let calendar: Arc<dyn MarketCalendar> = Arc::new(config.market.calendar());
        let stocks = config.runtime.stock_list()?;
        let query = KQuery::new(start, end, self.ktype);

        let mut units = Vec::new();
        for stock in &stocks {
            for hold_days in [1, 3, 5, 10] {
                let system = DemoSystem::new(hold_days, self.capital, calendar.clone());
                units.push(EvaluationUnit::new(
                    Box::new(system),
                    stock.clone(),
                    query.clone(),
                ));
            }
        }

        tracing::info!(
            candidates = units.len(),
            start = %start,
            end = %end,
            ktype = %self.ktype,
            "Evaluating candidates"
        );
        let results = evaluate_batch(units, calendar, config.evaluate.workers).await;

        print!("{:<10} {:<14}", "stock", "system");
        for key in STATISTIC_KEYS {
            print!(" {:>18}", key);
        }
        println!();
        for result in &results {
            if result.is_sentinel() {
                println!("{:<10} {:<14} (failed)", result.market_code, result.name);
                continue;
            }
            print!("{:<10} {:<14}", result.market_code, result.name);
            for key in STATISTIC_KEYS {
                match result.get(key) {
                    Some(v) => print!(" {:>18}", v.round_dp(4)),
                    None => print!(" {:>18}", "-"),
                }
            }
            println!();
        }

        match select_optimal(
            &results,
            &config.evaluate.select_key,
            config.evaluate.select_mode,
        )? {
            Some(best) => {
                let result = &results[best];
                println!(
                    "\nOptimal by {} ({:?}): {} on {}",
                    config.evaluate.select_key,
                    config.evaluate.select_mode,
                    result.name,
                    result.market_code
                );
            }
            None => println!("\nNo candidate produced the selection statistic"),
        }
        Ok(())
    }
}
