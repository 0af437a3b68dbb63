//! Live quote delivery
//!
//! A quote feed pushes spot records over a channel; the `SpotAgent` drains
//! them in batches, invoking a per-record handler for each record and a
//! post-batch handler once per delivered batch with its receive time.
//! Handlers only enqueue work; execution stays on the event loop.

mod buffer;
mod ws;

pub use buffer::{parse_market_response, BufferClient, BufferConfig};
pub use ws::WsQuoteFeed;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One live quote update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotRecord {
    /// Market prefix, e.g. "SH"
    pub market: String,
    /// Instrument code
    pub code: String,
    /// Quote timestamp
    pub datetime: NaiveDateTime,
    /// Day open
    pub open: Decimal,
    /// Day high
    pub high: Decimal,
    /// Day low
    pub low: Decimal,
    /// Last price
    pub close: Decimal,
    /// Cumulative volume
    pub volume: Decimal,
    /// Cumulative amount
    pub amount: Decimal,
}

/// Trait for quote feed implementations
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Subscribe to spot record updates
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<SpotRecord>>;
}

/// Handler invoked once per spot record
pub type SpotFn = Arc<dyn Fn(&SpotRecord) + Send + Sync + 'static>;
/// Handler invoked once per delivered batch, with the batch receive time
pub type PostBatchFn = Arc<dyn Fn(NaiveDateTime) + Send + Sync + 'static>;

/// Dispatches spot record batches to registered handlers
#[derive(Default)]
pub struct SpotAgent {
    process: Vec<SpotFn>,
    post_process: Vec<PostBatchFn>,
}

impl SpotAgent {
    /// Create an agent with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a per-record handler
    pub fn add_process(&mut self, f: SpotFn) {
        self.process.push(f);
    }

    /// Register a post-batch handler
    pub fn add_post_process(&mut self, f: PostBatchFn) {
        self.post_process.push(f);
    }

    /// Consume the agent and drive it from the given feed channel.
    ///
    /// Runs until the feed closes its sender.
    pub fn start(self, mut rx: mpsc::Receiver<SpotRecord>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut batch = Vec::new();
            loop {
                let received = rx.recv_many(&mut batch, 256).await;
                if received == 0 {
                    tracing::info!("Quote feed closed, spot agent stopping");
                    break;
                }
                metrics::counter!("quantrun_spot_records_total").increment(received as u64);
                for spot in batch.drain(..) {
                    for f in &self.process {
                        f(&spot);
                    }
                }
                let received_at = crate::scheduler::now_local();
                for f in &self.post_process {
                    f(received_at);
                }
            }
        })
    }
}
