//! Parallel batch evaluation
//!
//! Fans N independent (trading-system, stock, query) units across a bounded
//! blocking-worker pool, isolates per-unit faults, and collects results in
//! submission order. Statistics are truncated at the last trading date of the
//! unit's query so still-open positions never bias a ranking. Selection picks
//! the best scorer by a validated statistic key with stable, first-wins ties.
//!
//! This path is orthogonal to the event queue and scheduler: it owns its
//! workers for the duration of one call and returns only once every unit has
//! finished.

use crate::market::{KQuery, MarketCalendar, Stock};
use crate::perf::Performance;
use crate::system::TradingSystem;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One independent evaluation: a system run against a stock over a window.
///
/// `None` handles model the absent-input case; either one yields a sentinel
/// result instead of a fault.
pub struct EvaluationUnit {
    /// System to run; owned, so concurrent units share no state
    pub system: Option<Box<dyn TradingSystem>>,
    /// Stock to run against
    pub stock: Option<Stock>,
    /// Simulation window and granularity
    pub query: KQuery,
}

impl EvaluationUnit {
    /// Create a complete unit
    pub fn new(system: Box<dyn TradingSystem>, stock: Stock, query: KQuery) -> Self {
        Self {
            system: Some(system),
            stock: Some(stock),
            query,
        }
    }
}

/// Outcome of one unit; `Default` is the sentinel for failed/invalid units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    /// Identity of the stock evaluated, e.g. "SH600000"
    pub market_code: String,
    /// Display name of the system evaluated
    pub name: String,
    /// Named performance statistics
    pub values: BTreeMap<String, Decimal>,
}

impl EvaluationResult {
    /// True for the empty result a failed or invalid unit yields
    pub fn is_sentinel(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a statistic by name
    pub fn get(&self, key: &str) -> Option<Decimal> {
        self.values.get(key).copied()
    }
}

/// Whether selection keeps the maximum or minimum scorer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectMode {
    /// Highest statistic value wins
    #[default]
    Max,
    /// Lowest statistic value wins
    Min,
}

/// Batch evaluation configuration faults
#[derive(Debug, Clone, Error)]
pub enum EvaluateError {
    /// The sort key does not name a known statistic
    #[error("Unknown statistic key: {0}")]
    UnknownStatistic(String),
}

/// Run all units concurrently and return one result per unit, in order.
///
/// `workers` bounds the pool; `0` means available hardware concurrency.
/// Zero units returns immediately without touching the calendar. A fault in
/// one unit never aborts its siblings.
pub async fn evaluate_batch(
    units: Vec<EvaluationUnit>,
    calendar: Arc<dyn MarketCalendar>,
    workers: usize,
) -> Vec<EvaluationResult> {
    let total = units.len();
    if total == 0 {
        return vec![];
    }

    // Last trading date derived once per distinct query, never from live now
    let mut last_dates: HashMap<KQuery, Option<NaiveDate>> = HashMap::new();
    for unit in &units {
        if !last_dates.contains_key(&unit.query) {
            let last = calendar.trading_dates(&unit.query).last().copied();
            last_dates.insert(unit.query.clone(), last);
        }
    }

    let workers = effective_workers(workers);
    tracing::info!(units = total, workers, "Starting batch evaluation");

    let semaphore = Arc::new(Semaphore::new(workers));
    let mut join_set = JoinSet::new();
    for (idx, unit) in units.into_iter().enumerate() {
        let last_date = last_dates.get(&unit.query).copied().flatten();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (idx, EvaluationResult::default()),
            };
            match tokio::task::spawn_blocking(move || run_unit(idx, unit, last_date)).await {
                Ok(result) => (idx, result),
                Err(e) => {
                    metrics::counter!("quantrun_eval_units_failed_total").increment(1);
                    tracing::error!(unit = idx, error = %e, "Evaluation unit panicked");
                    (idx, EvaluationResult::default())
                }
            }
        });
    }

    let mut results = vec![EvaluationResult::default(); total];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, result)) => results[idx] = result,
            Err(e) => tracing::error!(error = %e, "Evaluation task join failed"),
        }
    }
    results
}

/// Pick the best result index by a named statistic.
///
/// The key is validated against the known statistic set. Ties keep the first
/// unit in evaluation order; sentinel results are skipped. `Ok(None)` when no
/// result carries the statistic.
pub fn select_optimal(
    results: &[EvaluationResult],
    key: &str,
    mode: SelectMode,
) -> Result<Option<usize>, EvaluateError> {
    if !Performance::exists(key) {
        return Err(EvaluateError::UnknownStatistic(key.to_string()));
    }

    let mut best: Option<(usize, Decimal)> = None;
    for (idx, result) in results.iter().enumerate() {
        let Some(value) = result.get(key) else {
            continue;
        };
        let better = match (&best, mode) {
            (None, _) => true,
            (Some((_, current)), SelectMode::Max) => value > *current,
            (Some((_, current)), SelectMode::Min) => value < *current,
        };
        if better {
            best = Some((idx, value));
        }
    }
    Ok(best.map(|(idx, _)| idx))
}

fn effective_workers(requested: usize) -> usize {
    let hardware = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    if requested == 0 {
        hardware
    } else {
        requested.min(hardware)
    }
}

fn run_unit(idx: usize, unit: EvaluationUnit, last_date: Option<NaiveDate>) -> EvaluationResult {
    let Some(mut system) = unit.system else {
        tracing::warn!(unit = idx, "Unit has no trading system");
        return EvaluationResult::default();
    };
    let stock = match unit.stock {
        Some(stock) if !stock.is_null() => stock,
        _ => {
            tracing::warn!(unit = idx, "Unit has no stock");
            return EvaluationResult::default();
        }
    };
    let Some(last_date) = last_date else {
        tracing::warn!(unit = idx, "Empty trading calendar for unit query");
        return EvaluationResult::default();
    };

    match system.run(&stock, &unit.query) {
        Ok(()) => {
            let as_of = last_date.and_hms_opt(23, 59, 59).expect("valid end-of-day");
            let per = Performance::statistics(system.trade_manager(), as_of);
            metrics::counter!("quantrun_eval_units_completed_total").increment(1);
            EvaluationResult {
                market_code: stock.market_code(),
                name: system.name().to_string(),
                values: per.into_values(),
            }
        }
        Err(e) => {
            metrics::counter!("quantrun_eval_units_failed_total").increment(1);
            tracing::error!(unit = idx, error = %e, "Evaluation unit failed");
            EvaluationResult::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{KType, Session, StaticCalendar};
    use crate::perf::{TradeManager, TradeRecord};
    use chrono::{NaiveDateTime, NaiveTime};
    use rust_decimal_macros::dec;

    #[derive(Clone, Copy)]
    enum Behavior {
        Trades,
        Fails,
        Panics,
        TradesPastWindow,
    }

    #[derive(Clone)]
    struct TestSystem {
        name: String,
        behavior: Behavior,
        tm: TradeManager,
    }

    impl TestSystem {
        fn new(name: &str, behavior: Behavior) -> Box<dyn TradingSystem> {
            Box::new(Self {
                name: name.to_string(),
                behavior,
                tm: TradeManager::new(dec!(100000)),
            })
        }
    }

    impl TradingSystem for TestSystem {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&mut self, stock: &Stock, query: &KQuery) -> anyhow::Result<()> {
            let close = |date: NaiveDate| -> NaiveDateTime {
                date.and_hms_opt(15, 0, 0).unwrap()
            };
            match self.behavior {
                Behavior::Fails => anyhow::bail!("no data for {}", stock),
                Behavior::Panics => panic!("index out of range"),
                Behavior::Trades => {
                    self.tm.record_trade(TradeRecord {
                        datetime: close(query.start),
                        stock: stock.clone(),
                        realized_pnl: dec!(1000),
                    });
                    Ok(())
                }
                Behavior::TradesPastWindow => {
                    self.tm.record_trade(TradeRecord {
                        datetime: close(query.start),
                        stock: stock.clone(),
                        realized_pnl: dec!(1000),
                    });
                    // The system's internal clock ran past the query window
                    self.tm.record_trade(TradeRecord {
                        datetime: close(query.end + chrono::Duration::days(30)),
                        stock: stock.clone(),
                        realized_pnl: dec!(9000),
                    });
                    Ok(())
                }
            }
        }

        fn trade_manager(&self) -> &TradeManager {
            &self.tm
        }

        fn clone_box(&self) -> Box<dyn TradingSystem> {
            Box::new(Self {
                name: self.name.clone(),
                behavior: self.behavior,
                tm: TradeManager::new(self.tm.initial_cash()),
            })
        }
    }

    struct UntouchableCalendar;

    impl MarketCalendar for UntouchableCalendar {
        fn trading_dates(&self, _query: &KQuery) -> Vec<NaiveDate> {
            unreachable!("calendar must not be touched for an empty batch")
        }
        fn session(&self, _market: &str) -> anyhow::Result<Session> {
            unreachable!()
        }
        fn is_holiday(&self, _date: NaiveDate) -> bool {
            unreachable!()
        }
    }

    fn calendar() -> Arc<dyn MarketCalendar> {
        Arc::new(StaticCalendar::new().with_session(
            "SH",
            Session {
                open1: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                close1: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
                open2: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
                close2: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            },
        ))
    }

    fn query() -> KQuery {
        KQuery::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 28).unwrap(),
            KType::Day,
        )
    }

    fn stock(code: &str) -> Stock {
        Stock::new("SH", code)
    }

    #[tokio::test]
    async fn test_zero_units_returns_empty_without_calendar() {
        let results = evaluate_batch(vec![], Arc::new(UntouchableCalendar), 4).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_fault_isolation_across_units() {
        let units = vec![
            EvaluationUnit::new(TestSystem::new("a", Behavior::Trades), stock("600000"), query()),
            EvaluationUnit::new(TestSystem::new("b", Behavior::Trades), stock("600001"), query()),
            EvaluationUnit::new(TestSystem::new("c", Behavior::Fails), stock("600002"), query()),
            EvaluationUnit::new(TestSystem::new("d", Behavior::Panics), stock("600003"), query()),
            EvaluationUnit::new(TestSystem::new("e", Behavior::Trades), stock("600004"), query()),
        ];

        let results = evaluate_batch(units, calendar(), 2).await;
        assert_eq!(results.len(), 5);
        assert!(!results[0].is_sentinel());
        assert!(!results[1].is_sentinel());
        assert!(results[2].is_sentinel());
        assert!(results[3].is_sentinel());
        assert!(!results[4].is_sentinel());
        assert_eq!(results[4].market_code, "SH600004");
        assert_eq!(results[4].name, "e");
    }

    #[tokio::test]
    async fn test_missing_system_or_stock_yields_sentinel() {
        let units = vec![
            EvaluationUnit {
                system: None,
                stock: Some(stock("600000")),
                query: query(),
            },
            EvaluationUnit {
                system: Some(TestSystem::new("a", Behavior::Trades)),
                stock: None,
                query: query(),
            },
            EvaluationUnit {
                system: Some(TestSystem::new("b", Behavior::Trades)),
                stock: Some(Stock::default()),
                query: query(),
            },
        ];
        let results = evaluate_batch(units, calendar(), 0).await;
        assert!(results.iter().all(EvaluationResult::is_sentinel));
    }

    #[tokio::test]
    async fn test_statistics_truncated_at_last_trading_date() {
        let units = vec![EvaluationUnit::new(
            TestSystem::new("late", Behavior::TradesPastWindow),
            stock("600000"),
            query(),
        )];
        let results = evaluate_batch(units, calendar(), 1).await;
        // Only the in-window trade counts; the later one is past the calendar
        assert_eq!(results[0].get("total_pnl"), Some(dec!(1000)));
        assert_eq!(results[0].get("trade_count"), Some(dec!(1)));
    }

    #[tokio::test]
    async fn test_empty_calendar_for_query_yields_sentinel() {
        // Weekend-only window has no trading dates
        let weekend = KQuery::new(
            NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
            KType::Day,
        );
        let units = vec![EvaluationUnit::new(
            TestSystem::new("a", Behavior::Trades),
            stock("600000"),
            weekend,
        )];
        let results = evaluate_batch(units, calendar(), 1).await;
        assert!(results[0].is_sentinel());
    }

    fn result_with(score: Decimal) -> EvaluationResult {
        let mut values = BTreeMap::new();
        values.insert("total_pnl".to_string(), score);
        EvaluationResult {
            market_code: "SH600000".to_string(),
            name: "sys".to_string(),
            values,
        }
    }

    #[test]
    fn test_select_optimal_stable_max() {
        let results = vec![
            result_with(dec!(0.10)),
            result_with(dec!(0.25)),
            result_with(dec!(0.25)),
            result_with(dec!(-0.05)),
        ];
        let best = select_optimal(&results, "total_pnl", SelectMode::Max).unwrap();
        assert_eq!(best, Some(1));
    }

    #[test]
    fn test_select_optimal_min() {
        let results = vec![
            result_with(dec!(0.10)),
            result_with(dec!(0.25)),
            result_with(dec!(-0.05)),
        ];
        let best = select_optimal(&results, "total_pnl", SelectMode::Min).unwrap();
        assert_eq!(best, Some(2));
    }

    #[test]
    fn test_select_optimal_skips_sentinels() {
        let results = vec![
            EvaluationResult::default(),
            result_with(dec!(0.10)),
            EvaluationResult::default(),
        ];
        let best = select_optimal(&results, "total_pnl", SelectMode::Max).unwrap();
        assert_eq!(best, Some(1));
    }

    #[test]
    fn test_select_optimal_unknown_key() {
        let results = vec![result_with(dec!(0.10))];
        let err = select_optimal(&results, "sharpe", SelectMode::Max).unwrap_err();
        assert!(matches!(err, EvaluateError::UnknownStatistic(k) if k == "sharpe"));
    }

    #[test]
    fn test_select_optimal_all_sentinels() {
        let results = vec![EvaluationResult::default(), EvaluationResult::default()];
        let best = select_optimal(&results, "total_pnl", SelectMode::Max).unwrap();
        assert_eq!(best, None);
    }
}
