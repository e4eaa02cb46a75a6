//! Pusher protocol frames.
//!
//! Every frame is a JSON object `{"event": ..., "channel": ..., "data":
//! ...}`. The server usually sends `data` as a JSON-encoded *string*; this
//! module decodes it either way and sorts frames into a typed
//! [`ServerMessage`].

use serde::Deserialize;
use serde_json::{json, Value};

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const ERROR: &str = "pusher:error";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";

/// Frames the client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// First frame after the socket opens.
    ConnectionEstablished {
        socket_id: String,
        /// Seconds of silence after which the client should ping.
        activity_timeout: Option<u64>,
    },
    SubscriptionSucceeded { channel: String },
    SubscriptionError {
        channel: Option<String>,
        status: Option<u16>,
        error: Option<String>,
    },
    Ping,
    Pong,
    Error {
        message: Option<String>,
        code: Option<u16>,
    },
    /// An application event on a subscribed channel.
    ChannelEvent {
        channel: String,
        event: String,
        data: Value,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{event} frame missing {field}")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    #[error("unexpected frame {0:?}")]
    Unexpected(String),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Parse one text frame.
pub fn parse_message(text: &str) -> Result<ServerMessage, MessageError> {
    let frame: RawFrame = serde_json::from_str(text)?;
    let data = decode_data(frame.data);

    let message = match frame.event.as_str() {
        CONNECTION_ESTABLISHED => ServerMessage::ConnectionEstablished {
            socket_id: data
                .get("socket_id")
                .and_then(Value::as_str)
                .ok_or(MessageError::MissingField {
                    event: CONNECTION_ESTABLISHED,
                    field: "socket_id",
                })?
                .to_string(),
            activity_timeout: data.get("activity_timeout").and_then(Value::as_u64),
        },
        SUBSCRIPTION_SUCCEEDED => ServerMessage::SubscriptionSucceeded {
            channel: frame.channel.ok_or(MessageError::MissingField {
                event: SUBSCRIPTION_SUCCEEDED,
                field: "channel",
            })?,
        },
        SUBSCRIPTION_ERROR => ServerMessage::SubscriptionError {
            channel: frame.channel,
            status: data
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok()),
            error: data.get("error").and_then(Value::as_str).map(str::to_string),
        },
        PING => ServerMessage::Ping,
        PONG => ServerMessage::Pong,
        ERROR => ServerMessage::Error {
            message: data.get("message").and_then(Value::as_str).map(str::to_string),
            code: data
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok()),
        },
        _ => match frame.channel {
            Some(channel) => ServerMessage::ChannelEvent {
                channel,
                event: frame.event,
                data,
            },
            None => return Err(MessageError::Unexpected(frame.event)),
        },
    };
    Ok(message)
}

/// `data` arrives as a JSON string most of the time; unwrap it when it is.
fn decode_data(data: Value) -> Value {
    match data {
        Value::String(encoded) => match serde_json::from_str(&encoded) {
            Ok(decoded) => decoded,
            Err(_) => Value::String(encoded),
        },
        other => other,
    }
}

/// `pusher:subscribe` for a private channel.
pub fn subscribe_frame(channel: &str, auth: &str) -> String {
    json!({
        "event": SUBSCRIBE,
        "data": { "channel": channel, "auth": auth },
    })
    .to_string()
}

pub fn unsubscribe_frame(channel: &str) -> String {
    json!({
        "event": UNSUBSCRIBE,
        "data": { "channel": channel },
    })
    .to_string()
}

pub fn ping_frame() -> String {
    json!({ "event": PING, "data": {} }).to_string()
}

pub fn pong_frame() -> String {
    json!({ "event": PONG, "data": {} }).to_string()
}
