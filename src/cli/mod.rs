//! CLI interface for quantrun
//!
//! Provides subcommands for:
//! - `run`: Start the live strategy loop
//! - `backtest`: Evaluate candidate systems over a date range
//! - `status`: Show current state
//! - `config`: Show configuration

mod backtest;
mod run;

pub use backtest::BacktestArgs;
pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "quantrun")]
#[command(about = "Strategy runtime with session-aware scheduling and parallel backtest evaluation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the live strategy loop
    Run(RunArgs),
    /// Evaluate candidate systems over a date range and pick the best
    Backtest(BacktestArgs),
    /// Show current state
    Status,
    /// Show configuration
    Config,
}
