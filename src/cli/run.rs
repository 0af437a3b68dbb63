//! Run command implementation

use crate::config::Config;
use crate::quote::{BufferClient, BufferConfig, QuoteFeed, WsQuoteFeed};
use crate::runtime::Strategy;
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run without connecting a quote feed
    #[arg(long)]
    pub no_feed: bool,

    /// Interval in seconds for the in-session heartbeat task
    #[arg(long, default_value = "60")]
    pub interval_secs: i64,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let context = config.runtime.context()?;
        let calendar = Arc::new(config.market.calendar());

        if let Some(buffer_url) = &config.quote.buffer_url {
            catch_up_best_effort(buffer_url, config).await;
        }

        let mut strategy = Strategy::new(config.runtime.name.clone(), context, calendar);

        strategy.on_change(|_h, stock, spot| {
            tracing::info!(stock = %stock, close = %spot.close, at = %spot.datetime, "Spot change");
        });
        strategy.on_received_spot(|_h, received_at| {
            tracing::debug!(received_at = %received_at, "Spot batch delivered");
        });
        strategy.run_daily(
            |h| tracing::info!(now = %h.now(), "In-session heartbeat"),
            chrono::Duration::seconds(self.interval_secs),
            config.market.market.clone(),
            false,
        )?;

        // Signal handling stays with the binary; the runtime only exposes
        // the stop handle
        let stop = strategy.stop_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
                stop.request_stop();
            }
        });

        let feed: Option<Arc<dyn QuoteFeed>> = if self.no_feed {
            None
        } else {
            Some(Arc::new(WsQuoteFeed::new(config.quote.ws_url.clone())))
        };
        strategy.start(feed).await
    }
}

/// Catch-up is best effort; a dead buffer service must not keep the
/// strategy from starting.
async fn catch_up_best_effort(buffer_url: &str, config: &Config) {
    if let Err(e) = catch_up(buffer_url, config).await {
        tracing::warn!(
            url = %buffer_url,
            error = %e,
            "Quote buffer catch-up failed, continuing without it"
        );
    }
}

/// Pull any K-lines the quote buffer holds since the configured start date,
/// so a freshly started runtime is not blind to the running session.
async fn catch_up(buffer_url: &str, config: &Config) -> anyhow::Result<()> {
    let client = BufferClient::new(BufferConfig::new(buffer_url));
    let codes: Vec<String> = config
        .runtime
        .stock_list()?
        .iter()
        .map(|s| s.market_code())
        .collect();
    let since = config
        .runtime
        .start_date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let dates = vec![since; codes.len()];

    for ktype in &config.runtime.ktypes {
        let rows = client.fetch_market(*ktype, &codes, &dates).await?;
        for (code, records) in &rows {
            tracing::info!(code = %code, ktype = %ktype, records = records.len(), "Caught up from quote buffer");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        toml::from_str(
            r#"
            [runtime]
            name = "demo"
            stocks = ["SH600000"]
            start_date = "2024-01-02"

            [market]
            market = "SH"
        "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_buffer_is_an_error() {
        // Discard port; connection is refused immediately
        let err = catch_up("http://127.0.0.1:9", &config()).await.unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_catch_up_failure_does_not_propagate() {
        // Startup must survive a dead buffer service
        catch_up_best_effort("http://127.0.0.1:9", &config()).await;
    }
}
