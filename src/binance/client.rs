// =============================================================================
// Binance REST API Client: public klines endpoint
// =============================================================================
//
// Only public market data is needed, so there is no API key and no request
// signing. A 429 (or 418 auto-ban) response is surfaced as
// `FetchError::RateLimited` so the cache can enter its cooldown instead of
// treating it like any other upstream failure.
// =============================================================================

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::FetchError;
use crate::market_data::{Candle, CandleSource};
use crate::runtime_config::MarketDataConfig;

/// Binance REST client for `GET /api/v3/klines`.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    interval: String,
    limit: u32,
    client: reqwest::Client,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `BinanceClient`.
    ///
    /// # Arguments
    /// * `base_url`: e.g. `https://api.binance.com` (no trailing slash).
    /// * `interval`: kline interval such as `"15m"`.
    /// * `limit`: number of candles requested per call.
    pub fn new(
        base_url: impl Into<String>,
        interval: impl Into<String>,
        limit: u32,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = %base_url, "BinanceClient initialised");

        Self {
            base_url,
            interval: interval.into(),
            limit,
            client,
        }
    }

    pub fn from_config(cfg: &MarketDataConfig) -> Self {
        Self::new(
            cfg.base_url.clone(),
            cfg.interval.clone(),
            cfg.limit,
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public: no signature required).
    ///
    /// Array indices used:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(&self, symbol: &str) -> Result<Vec<Candle>, FetchError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit = self.limit.to_string();

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", self.interval.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
                warn!(symbol, status = status.as_u16(), "klines request rate limited");
                return Err(FetchError::RateLimited {
                    status: status.as_u16(),
                    body,
                });
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        let candles = parse_klines(&body)?;
        match candles.last() {
            Some(last) => debug!(symbol, count = candles.len(), close = last.close, "klines fetched"),
            None => debug!(symbol, "no klines returned"),
        }
        Ok(candles)
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_candles(&self, symbol: &str) -> Result<Vec<Candle>, FetchError> {
        self.get_klines(symbol).await
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("interval", &self.interval)
            .field("limit", &self.limit)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Decoding
// -----------------------------------------------------------------------------

/// Decode Binance's array-of-arrays kline payload.  Entries shorter than six
/// elements are skipped; a bad number anywhere fails the whole payload.
fn parse_klines(body: &serde_json::Value) -> Result<Vec<Candle>, FetchError> {
    let raw = body
        .as_array()
        .ok_or_else(|| FetchError::Decode("klines response is not an array".into()))?;

    let mut candles = Vec::with_capacity(raw.len());

    for entry in raw {
        let arr = entry
            .as_array()
            .ok_or_else(|| FetchError::Decode("kline entry is not an array".into()))?;

        if arr.len() < 6 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let timestamp = arr[0]
            .as_i64()
            .ok_or_else(|| FetchError::Decode(format!("open time is not an integer: {}", arr[0])))?;

        candles.push(Candle::new(
            timestamp,
            parse_str_f64(&arr[1])?,
            parse_str_f64(&arr[2])?,
            parse_str_f64(&arr[3])?,
            parse_str_f64(&arr[4])?,
            parse_str_f64(&arr[5])?,
        ));
    }

    Ok(candles)
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64, FetchError> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .map_err(|_| FetchError::Decode(format!("failed to parse '{s}' as f64")))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        Err(FetchError::Decode(format!("expected string or number, got: {val}")))
    }
}
