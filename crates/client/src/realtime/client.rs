//! WebSocket client for the channel provider.
//!
//! [`RealtimeClient`] holds the provider URL. [`RealtimeClient::connect`]
//! opens the socket and waits for `pusher:connection_established`, which
//! carries the socket id needed to authorize private channels.

use std::time::Duration;

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::RealtimeConfig;
use crate::realtime::messages::{parse_message, ServerMessage};

/// How long to wait for the provider's greeting.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fallback ping interval when the greeting omits `activity_timeout`.
const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings for the channel provider.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    ws_url: String,
}

/// A live, greeted connection.
#[derive(Debug)]
pub struct RealtimeConnection {
    /// Provider-assigned id, signed into private-channel auth.
    pub socket_id: String,
    /// Ping after this long without traffic.
    pub activity_timeout: Duration,
    pub ws_stream: WsStream,
}

impl RealtimeClient {
    /// `ws_url` is the full URL including `/app/{key}` and query.
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.ws_url())
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open the socket and wait for the connection greeting.
    pub async fn connect(&self) -> Result<RealtimeConnection, RealtimeError> {
        let (mut ws_stream, _response) = connect_async(&self.ws_url)
            .await
            .map_err(|e| RealtimeError::Connection(format!("{}: {e}", self.ws_url)))?;

        let (socket_id, activity_timeout) =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, await_greeting(&mut ws_stream))
                .await
                .map_err(|_| RealtimeError::HandshakeTimeout)??;
        tracing::info!(socket_id = %socket_id, "Connected to channel provider");

        Ok(RealtimeConnection {
            socket_id,
            activity_timeout: activity_timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT),
            ws_stream,
        })
    }
}

async fn await_greeting(
    ws_stream: &mut WsStream,
) -> Result<(String, Option<u64>), RealtimeError> {
    while let Some(frame) = ws_stream.next().await {
        let frame = frame.map_err(|e| RealtimeError::Protocol(e.to_string()))?;
        let Message::Text(text) = frame else {
            continue;
        };
        match parse_message(&text) {
            Ok(ServerMessage::ConnectionEstablished {
                socket_id,
                activity_timeout,
            }) => return Ok((socket_id, activity_timeout)),
            Ok(ServerMessage::Error { message, code }) => {
                return Err(RealtimeError::Rejected {
                    code,
                    message: message.unwrap_or_default(),
                })
            }
            Ok(other) => tracing::debug!(?other, "Ignoring frame before greeting"),
            Err(e) => tracing::warn!(error = %e, "Unparseable frame before greeting"),
        }
    }
    Err(RealtimeError::Closed)
}

/// Errors from the channel socket.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No connection greeting within the handshake timeout")]
    HandshakeTimeout,

    #[error("Provider rejected the connection ({code:?}): {message}")]
    Rejected { code: Option<u16>, message: String },

    #[error("Subscription to {channel} failed: {reason}")]
    Subscription { channel: String, reason: String },

    #[error("Channel authorization failed: {0}")]
    Authorization(#[from] crate::api::ApiError),

    #[error("Socket closed")]
    Closed,
}

impl RealtimeError {
    /// The provider refused the connection for good; retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected { code: Some(code), .. } if is_fatal_code(*code))
    }
}

/// Pusher reserves 4000-4099 for errors the client must not reconnect after.
pub(crate) fn is_fatal_code(code: u16) -> bool {
    (4000..4100).contains(&code)
}
