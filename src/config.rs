//! Configuration types for quantrun

use crate::evaluate::SelectMode;
use crate::market::{KType, Session, StaticCalendar, Stock};
use crate::runtime::StrategyContext;
use crate::telemetry::LogFormat;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub market: MarketConfig,
    #[serde(default)]
    pub quote: QuoteConfig,
    #[serde(default)]
    pub evaluate: EvaluateConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Strategy runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Strategy display name
    pub name: String,

    /// Observed instruments as market-prefixed codes, e.g. "SH600000"
    pub stocks: Vec<String>,

    /// K-line granularities the strategy consumes
    #[serde(default = "default_ktypes")]
    pub ktypes: Vec<KType>,

    /// First date of interest
    pub start_date: NaiveDate,
}

fn default_ktypes() -> Vec<KType> {
    vec![KType::Day]
}

impl RuntimeConfig {
    /// Parse the configured market-prefixed codes into stocks.
    ///
    /// The market prefix is the leading alphabetic run, e.g. "SH600000"
    /// splits into market "SH" and code "600000".
    pub fn stock_list(&self) -> anyhow::Result<Vec<Stock>> {
        self.stocks
            .iter()
            .map(|s| {
                let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
                let (market, code) = s.split_at(split);
                anyhow::ensure!(
                    !market.is_empty() && !code.is_empty(),
                    "Invalid stock code: {}",
                    s
                );
                Ok(Stock::new(market, code))
            })
            .collect()
    }

    /// Build the strategy context described by this section
    pub fn context(&self) -> anyhow::Result<StrategyContext> {
        Ok(StrategyContext::new(
            self.stock_list()?,
            self.ktypes.clone(),
            self.start_date,
        ))
    }
}

/// Trading calendar configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Market prefix the session applies to, e.g. "SH"
    pub market: String,

    /// Morning session open
    #[serde(default = "default_open1")]
    pub open1: NaiveTime,

    /// Morning session close
    #[serde(default = "default_close1")]
    pub close1: NaiveTime,

    /// Afternoon session open
    #[serde(default = "default_open2")]
    pub open2: NaiveTime,

    /// Afternoon session close
    #[serde(default = "default_close2")]
    pub close2: NaiveTime,

    /// Non-weekend dates with no trading
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

fn default_open1() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap()
}
fn default_close1() -> NaiveTime {
    NaiveTime::from_hms_opt(11, 30, 0).unwrap()
}
fn default_open2() -> NaiveTime {
    NaiveTime::from_hms_opt(13, 0, 0).unwrap()
}
fn default_close2() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 0, 0).unwrap()
}

impl MarketConfig {
    /// Build a calendar with the configured session and holidays
    pub fn calendar(&self) -> StaticCalendar {
        let mut calendar = StaticCalendar::new().with_session(
            self.market.clone(),
            Session {
                open1: self.open1,
                close1: self.close1,
                open2: self.open2,
                close2: self.close2,
            },
        );
        for holiday in &self.holidays {
            calendar = calendar.with_holiday(*holiday);
        }
        calendar
    }
}

/// Quote delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteConfig {
    /// WebSocket quote server URL
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Quote-buffer service base URL, if catch-up fetches are wanted
    #[serde(default)]
    pub buffer_url: Option<String>,
}

fn default_ws_url() -> String {
    "ws://localhost:9001/spot".to_string()
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            buffer_url: None,
        }
    }
}

/// Batch evaluation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateConfig {
    /// Worker cap for parallel evaluation (0 = all cores)
    #[serde(default)]
    pub workers: usize,

    /// Statistic used for optimal selection
    #[serde(default = "default_select_key")]
    pub select_key: String,

    /// Whether the highest or lowest statistic wins
    #[serde(default)]
    pub select_mode: SelectMode,
}

fn default_select_key() -> String {
    "total_return_pct".to_string()
}

impl Default for EvaluateConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            select_key: default_select_key(),
            select_mode: SelectMode::Max,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus listener port; metrics are disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: None,
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
        [runtime]
        name = "demo"
        stocks = ["SH600000", "SZ000001"]
        ktypes = ["min5", "day"]
        start_date = "2024-01-02"

        [market]
        market = "SH"
        open1 = "09:30:00"
        close1 = "11:30:00"
        open2 = "13:00:00"
        close2 = "15:00:00"
        holidays = ["2024-02-12"]

        [quote]
        ws_url = "ws://quotes.internal:9001/spot"
        buffer_url = "http://quotes.internal:9002"

        [evaluate]
        workers = 4
        select_key = "max_drawdown_pct"
        select_mode = "min"

        [telemetry]
        metrics_port = 9090
        log_level = "debug"
        log_format = "json"
    "#;

    #[test]
    fn test_config_deserialize() {
        let config: Config = toml::from_str(FULL).unwrap();
        assert_eq!(config.runtime.name, "demo");
        assert_eq!(config.runtime.ktypes, vec![KType::Min5, KType::Day]);
        assert_eq!(config.market.holidays.len(), 1);
        assert_eq!(config.evaluate.workers, 4);
        assert_eq!(config.evaluate.select_mode, SelectMode::Min);
        assert_eq!(config.telemetry.metrics_port, Some(9090));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml = r#"
            [runtime]
            name = "demo"
            stocks = ["SH600000"]
            start_date = "2024-01-02"

            [market]
            market = "SH"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.ktypes, vec![KType::Day]);
        assert_eq!(config.market.open1, default_open1());
        assert_eq!(config.quote.ws_url, default_ws_url());
        assert!(config.quote.buffer_url.is_none());
        assert_eq!(config.evaluate.workers, 0);
        assert_eq!(config.evaluate.select_mode, SelectMode::Max);
        assert!(config.telemetry.metrics_port.is_none());
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_stock_list_parsing() {
        let config: Config = toml::from_str(FULL).unwrap();
        let stocks = config.runtime.stock_list().unwrap();
        assert_eq!(stocks[0], Stock::new("SH", "600000"));
        assert_eq!(stocks[1], Stock::new("SZ", "000001"));
    }

    #[test]
    fn test_stock_list_rejects_missing_prefix() {
        let runtime = RuntimeConfig {
            name: "demo".to_string(),
            stocks: vec!["600000".to_string()],
            ktypes: default_ktypes(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        };
        assert!(runtime.stock_list().is_err());
    }

    #[test]
    fn test_calendar_from_market_config() {
        let config: Config = toml::from_str(FULL).unwrap();
        let calendar = config.market.calendar();
        use crate::market::MarketCalendar;
        assert!(calendar.is_holiday(NaiveDate::from_ymd_opt(2024, 2, 12).unwrap()));
        let session = calendar.session("SH").unwrap();
        assert_eq!(session.open1, default_open1());
        assert!(calendar.session("XX").is_err());
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.runtime.stocks.len(), 2);
    }
}
