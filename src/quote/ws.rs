//! WebSocket quote feed
//!
//! Connects to a quote server publishing spot records as JSON text frames,
//! with automatic reconnection and exponential backoff. Malformed frames are
//! skipped; the subscriber channel closing ends the feed.

use super::{QuoteFeed, SpotRecord};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// WebSocket quote feed configuration
#[derive(Debug, Clone)]
pub struct WsQuoteFeed {
    url: String,
    max_reconnect_attempts: u32,
    initial_reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl WsQuoteFeed {
    /// Create a feed for the given quote server URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 10,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }

    /// Set maximum reconnection attempts (0 = infinite)
    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// The configured URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Parse one text frame into a spot record
    fn parse_frame(text: &str) -> Option<SpotRecord> {
        match serde_json::from_str::<SpotRecord>(text) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed spot frame");
                None
            }
        }
    }

    async fn run_connection_loop(self, tx: mpsc::Sender<SpotRecord>) {
        let mut attempts = 0u32;
        let mut delay = self.initial_reconnect_delay;

        loop {
            match self.connect_and_stream(&tx).await {
                Ok(()) => {
                    tracing::info!("Quote feed connection closed cleanly");
                    break;
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = attempts,
                        "Quote feed connection error, reconnecting..."
                    );
                    if self.max_reconnect_attempts > 0 && attempts >= self.max_reconnect_attempts {
                        tracing::error!("Max quote feed reconnection attempts reached");
                        break;
                    }
                    if tx.is_closed() {
                        tracing::info!("Subscriber dropped, stopping quote feed");
                        break;
                    }
                    sleep(delay).await;
                    delay = (delay * 2).min(self.max_reconnect_delay);
                }
            }
        }
    }

    async fn connect_and_stream(&self, tx: &mpsc::Sender<SpotRecord>) -> anyhow::Result<()> {
        tracing::info!(url = %self.url, "Connecting to quote server");
        let (ws_stream, _response) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("Quote feed connected");

        while let Some(msg) = read.next().await {
            match msg? {
                Message::Text(text) => {
                    if let Some(record) = Self::parse_frame(&text) {
                        if tx.send(record).await.is_err() {
                            tracing::debug!("Subscriber dropped, closing connection");
                            return Ok(());
                        }
                    }
                }
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                }
                Message::Close(_) => {
                    tracing::info!("Received close frame");
                    return Ok(());
                }
                _ => {}
            }
        }
        anyhow::bail!("Stream ended unexpectedly")
    }
}

#[async_trait]
impl QuoteFeed for WsQuoteFeed {
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<SpotRecord>> {
        let (tx, rx) = mpsc::channel(1024);
        let feed = self.clone();
        tokio::spawn(async move {
            feed.run_connection_loop(tx).await;
        });
        Ok(rx)
    }
}
