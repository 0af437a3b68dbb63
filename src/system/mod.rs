//! Trading system seam
//!
//! A trading system is the composed strategy (signals, money management,
//! selection) that consumes K-data and produces simulated trades. The core
//! only needs it to be runnable, to expose its trade manager afterwards, and
//! to be clonable so each concurrent evaluation owns an isolated instance.

use crate::market::{KQuery, Stock};
use crate::perf::TradeManager;

/// Capability set required of a trading system
pub trait TradingSystem: Send {
    /// Display identifier
    fn name(&self) -> &str;

    /// Execute a simulation over the stock and query window, leaving trade
    /// state queryable via [`TradingSystem::trade_manager`]
    fn run(&mut self, stock: &Stock, query: &KQuery) -> anyhow::Result<()>;

    /// Account state produced by the last run
    fn trade_manager(&self) -> &TradeManager;

    /// Fresh instance with identical configuration and no run state, for
    /// isolated concurrent reuse
    fn clone_box(&self) -> Box<dyn TradingSystem>;
}

impl Clone for Box<dyn TradingSystem> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
