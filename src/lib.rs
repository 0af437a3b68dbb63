//! quantrun: strategy runtime for live trading and backtest evaluation
//!
//! This library provides the core components for:
//! - A serialized event loop with fault containment
//! - Calendar-aware timer scheduling aligned to trading sessions
//! - A live/virtual clock shared between live runs and backtests
//! - Live quote delivery over WebSocket with catch-up fetches
//! - Parallel evaluation of candidate trading systems with optimal selection
//! - Performance statistics over simulated trade records
//! - Full observability stack

pub mod cli;
pub mod clock;
pub mod config;
pub mod evaluate;
pub mod executor;
pub mod market;
pub mod perf;
pub mod quote;
pub mod runtime;
pub mod scheduler;
pub mod system;
pub mod telemetry;
