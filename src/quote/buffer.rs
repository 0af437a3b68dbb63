//! Quote-buffer service client
//!
//! Fetches recent K-line rows from a remote quote-buffer service to catch a
//! freshly started runtime up with the live session. The wire protocol is a
//! JSON request `{cmd, ktype, codes[], dates[]}` answered by
//! `{ret, msg, data:[{code, data:[[ts,o,h,l,c,vol,amt],..]},..]}`. A decode
//! fault on any row or record is logged and skipped; it never aborts the
//! remaining records.

use crate::market::{KRecord, KType};
use chrono::NaiveDateTime;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

/// Success value of the response `ret` field
const RET_SUCCESS: i64 = 0;

/// Quote-buffer client configuration
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Service base URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl BufferConfig {
    /// Create a config with the default timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct MarketRequest<'a> {
    cmd: &'a str,
    ktype: String,
    codes: &'a [String],
    dates: &'a [String],
}

#[derive(Debug, Deserialize)]
struct MarketResponse {
    ret: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<CodeRows>,
}

#[derive(Debug, Deserialize)]
struct CodeRows {
    code: String,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

/// Client for the quote-buffer service
pub struct BufferClient {
    config: BufferConfig,
    client: Client,
}

impl BufferClient {
    /// Create a client for the given service
    pub fn new(config: BufferConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    /// Fetch K-line rows newer than `dates[i]` for each `codes[i]`.
    ///
    /// Returns `(market_code, rows)` pairs; rows that fail to decode are
    /// skipped with a logged error.
    pub async fn fetch_market(
        &self,
        ktype: KType,
        codes: &[String],
        dates: &[String],
    ) -> anyhow::Result<Vec<(String, Vec<KRecord>)>> {
        let url = format!("{}/market", self.config.base_url);
        tracing::debug!(url = %url, ktype = %ktype, codes = codes.len(), "Fetching from quote buffer");

        let request = MarketRequest {
            cmd: "market",
            ktype: ktype.to_string(),
            codes,
            dates,
        };
        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Quote buffer error: {} - {}", status, body);
        }

        let body = response.text().await?;
        parse_market_response(&body)
    }
}

/// Decode a quote-buffer response body into per-code K-record rows.
///
/// Non-success `ret` is an error; individual bad rows or records are logged
/// and skipped.
pub fn parse_market_response(body: &str) -> anyhow::Result<Vec<(String, Vec<KRecord>)>> {
    let response: MarketResponse = serde_json::from_str(body)?;
    if response.ret != RET_SUCCESS {
        anyhow::bail!(
            "Quote buffer returned error: ret={}, msg={}",
            response.ret,
            response.msg
        );
    }

    let mut out = Vec::with_capacity(response.data.len());
    for record in response.data {
        let mut rows = Vec::with_capacity(record.data.len());
        for row in &record.data {
            match decode_row(row) {
                Ok(krecord) => rows.push(krecord),
                Err(e) => {
                    let raw = serde_json::Value::Array(row.clone());
                    tracing::error!(
                        code = %record.code,
                        error = %e,
                        row = %raw,
                        "Failed to decode K-record row, skipping"
                    );
                }
            }
        }
        out.push((record.code, rows));
    }
    Ok(out)
}

/// Decode one `[ts, open, high, low, close, volume, amount]` row
fn decode_row(row: &[Value]) -> anyhow::Result<KRecord> {
    if row.len() != 7 {
        anyhow::bail!("expected 7 fields, got {}", row.len());
    }
    let ts = row[0]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("timestamp is not a string"))?;
    let datetime = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S"))?;
    Ok(KRecord {
        datetime,
        open: decode_decimal(&row[1])?,
        high: decode_decimal(&row[2])?,
        low: decode_decimal(&row[3])?,
        close: decode_decimal(&row[4])?,
        volume: decode_decimal(&row[5])?,
        amount: decode_decimal(&row[6])?,
    })
}

fn decode_decimal(value: &Value) -> anyhow::Result<Decimal> {
    match value {
        Value::Number(n) => Ok(Decimal::from_str(&n.to_string())?),
        Value::String(s) => Ok(Decimal::from_str(s)?),
        other => anyhow::bail!("expected number, got {}", other),
    }
}
