// =============================================================================
// Error types for the market-data cache and the game socket client
// =============================================================================

use std::time::Duration;

use thiserror::Error;

/// Failure of an upstream candle fetch.
///
/// `Clone` because one settled fetch is handed to every caller coalesced onto
/// it.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// HTTP 429 (or 418, Binance's auto-ban escalation of 429).
    #[error("upstream rate limited ({status}): {body}")]
    RateLimited { status: u16, body: String },

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to decode klines: {0}")]
    Decode(String),

    /// The background fetch task panicked or was aborted by the runtime.
    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Whether this failure is the upstream's rate-limit signal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// Failure of a socket connection attempt.
#[derive(Debug, Clone, Error)]
pub enum SocketError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    /// `disconnect()` was called while the handshake was still running.
    #[error("connection attempt cancelled by disconnect")]
    Cancelled,
}

impl From<tokio_tungstenite::tungstenite::Error> for SocketError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
