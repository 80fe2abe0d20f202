// =============================================================================
// Socket transport: connector seam between the client and tungstenite
// =============================================================================

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::error::SocketError;

/// Inbound text frames; `None` means the peer closed the connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, SocketError>> + Send>>;

/// Outbound text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SocketError> + Send>>;

/// An established, message-oriented duplex connection.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens one connection per call.  The caller bounds the handshake with its
/// own timeout.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Transport, SocketError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport, SocketError> {
        info!(url = %self.url, "connecting to game WebSocket");
        let (ws_stream, _response) = connect_async(self.url.as_str()).await?;
        let (write, read) = ws_stream.split();

        let sink = write.with(|frame: String| {
            future::ready(Ok::<Message, SocketError>(Message::Text(frame)))
        });

        // Ping / Pong / Close frames are handled by tungstenite; only payload
        // frames reach the client.
        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        warn!("dropping non-UTF-8 binary frame");
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(SocketError::from(e))),
            })
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Derive the game socket URL from the REST API base URL:
/// `https://host/api/...` -> `wss://host/socket/`.
pub fn socket_url_from_api_url(api_url: &str) -> Option<String> {
    let rest = api_url
        .strip_prefix("https://")
        .or_else(|| api_url.strip_prefix("http://"))?;
    let host = rest.split('/').next().filter(|h| !h.is_empty())?;
    Some(format!("wss://{host}/socket/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_keeps_only_host() {
        assert_eq!(
            socket_url_from_api_url("https://games.example.com/api/v1").as_deref(),
            Some("wss://games.example.com/socket/")
        );
        assert_eq!(
            socket_url_from_api_url("https://games.example.com").as_deref(),
            Some("wss://games.example.com/socket/")
        );
    }

    #[test]
    fn socket_url_rejects_missing_scheme_or_host() {
        assert!(socket_url_from_api_url("games.example.com").is_none());
        assert!(socket_url_from_api_url("https:///api").is_none());
    }
}
