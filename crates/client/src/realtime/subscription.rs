//! One private-channel subscription and the task that keeps it alive.
//!
//! The task connects, authorizes the channel for its socket id, subscribes,
//! then pumps frames until cancelled. Channel events are forwarded as
//! [`ChannelNotice`]s; the current [`SubscriptionState`] is published on a
//! watch channel. When the socket drops, the [`ReconnectPolicy`] decides
//! whether the task backs off and subscribes again.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::ChannelAuthorizer;
use crate::realtime::client::{
    is_fatal_code, RealtimeClient, RealtimeConnection, RealtimeError, WsStream,
};
use crate::realtime::messages::{
    parse_message, ping_frame, pong_frame, subscribe_frame, unsubscribe_frame, ServerMessage,
};
use crate::realtime::reconnect::{retry_with_backoff, ReconnectPolicy};

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
}

/// What the subscription task hands to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotice {
    /// An application event on the channel, `data` already decoded.
    Event { event: String, data: Value },
    /// The channel is active again after a dropped socket. Events sent
    /// while disconnected were missed.
    Resubscribed,
}

/// Handle to a running subscription. Dropping it cancels the task.
pub struct ChannelSubscription {
    channel: String,
    state: watch::Receiver<SubscriptionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Target {
    client: RealtimeClient,
    authorizer: Arc<dyn ChannelAuthorizer>,
    channel: String,
    policy: ReconnectPolicy,
}

enum PumpEnd {
    Cancelled,
    Dropped(String),
    /// Provider told us not to reconnect (error codes 4000-4099).
    Fatal(String),
}

impl ChannelSubscription {
    /// Start subscribing to `channel` on a background task.
    ///
    /// `cancel` is usually a child of the owning view's token.
    pub fn spawn(
        client: RealtimeClient,
        authorizer: Arc<dyn ChannelAuthorizer>,
        channel: String,
        policy: ReconnectPolicy,
        notices: mpsc::Sender<ChannelNotice>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state) = watch::channel(SubscriptionState::Subscribing);
        let target = Target {
            client,
            authorizer,
            channel: channel.clone(),
            policy,
        };
        let task = tokio::spawn(run(target, state_tx, notices, cancel.clone()));

        Self {
            channel,
            state,
            cancel,
            task: Some(task),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Unsubscribe, close the socket, and wait for the task to finish.
    pub async fn release(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(channel = %self.channel, error = %e, "Subscription task panicked");
            }
        }
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    target: Target,
    state_tx: watch::Sender<SubscriptionState>,
    notices: mpsc::Sender<ChannelNotice>,
    cancel: CancellationToken,
) {
    let channel = target.channel.as_str();
    let mut resubscribing = false;

    loop {
        state_tx.send_replace(SubscriptionState::Subscribing);

        let Some(conn) = connect_once_or_retry(&target, &cancel).await else {
            break;
        };

        state_tx.send_replace(SubscriptionState::Active);
        tracing::info!(channel, "Subscribed");
        if resubscribing && notices.send(ChannelNotice::Resubscribed).await.is_err() {
            break;
        }
        resubscribing = true;

        match pump(conn, channel, &notices, &cancel).await {
            PumpEnd::Cancelled => break,
            PumpEnd::Fatal(reason) => {
                tracing::warn!(channel, reason = %reason, "Channel provider refused reconnection");
                break;
            }
            PumpEnd::Dropped(reason) => {
                tracing::warn!(channel, reason = %reason, "Channel socket dropped");
                if matches!(target.policy, ReconnectPolicy::Disabled) {
                    break;
                }
            }
        }
    }

    state_tx.send_replace(SubscriptionState::Unsubscribed);
    tracing::debug!(channel, "Subscription task finished");
}

/// One attempt under [`ReconnectPolicy::Disabled`], backoff otherwise.
///
/// A rejected session token or a fatal provider error cancels the
/// subscription instead of retrying.
async fn connect_once_or_retry(
    target: &Target,
    cancel: &CancellationToken,
) -> Option<RealtimeConnection> {
    let client = &target.client;
    let authorizer = target.authorizer.as_ref();
    let channel = target.channel.as_str();

    let attempt = move || async move {
        let result = establish(client, authorizer, channel).await;
        match &result {
            Err(RealtimeError::Authorization(e)) if e.is_unauthorized() => cancel.cancel(),
            Err(e) if e.is_fatal() => {
                tracing::warn!(channel, error = %e, "Channel provider refused connection");
                cancel.cancel();
            }
            _ => {}
        }
        result
    };

    match &target.policy {
        ReconnectPolicy::Backoff(config) => retry_with_backoff(config, cancel, attempt).await,
        ReconnectPolicy::Disabled => {
            tokio::select! {
                _ = cancel.cancelled() => None,
                result = attempt() => match result {
                    Ok(conn) => Some(conn),
                    Err(e) => {
                        tracing::warn!(channel, error = %e, "Subscription failed");
                        None
                    }
                },
            }
        }
    }
}

/// Connect, authorize, subscribe, and wait for the provider to confirm.
async fn establish(
    client: &RealtimeClient,
    authorizer: &dyn ChannelAuthorizer,
    channel: &str,
) -> Result<RealtimeConnection, RealtimeError> {
    let mut conn = client.connect().await?;
    let auth = authorizer.authorize(&conn.socket_id, channel).await?;

    conn.ws_stream
        .send(Message::Text(subscribe_frame(channel, &auth)))
        .await
        .map_err(|e| RealtimeError::Protocol(e.to_string()))?;

    tokio::time::timeout(SUBSCRIBE_TIMEOUT, await_subscribed(&mut conn.ws_stream, channel))
        .await
        .map_err(|_| RealtimeError::Subscription {
            channel: channel.to_string(),
            reason: "no confirmation from provider".into(),
        })??;

    Ok(conn)
}

async fn await_subscribed(ws_stream: &mut WsStream, channel: &str) -> Result<(), RealtimeError> {
    while let Some(frame) = ws_stream.next().await {
        let frame = frame.map_err(|e| RealtimeError::Protocol(e.to_string()))?;
        let Message::Text(text) = frame else {
            continue;
        };
        match parse_message(&text) {
            Ok(ServerMessage::SubscriptionSucceeded { channel: confirmed }) if confirmed == channel => {
                return Ok(());
            }
            Ok(ServerMessage::SubscriptionError { status, error, .. }) => {
                return Err(RealtimeError::Subscription {
                    channel: channel.to_string(),
                    reason: match (status, error) {
                        (Some(status), Some(error)) => format!("{status}: {error}"),
                        (Some(status), None) => format!("status {status}"),
                        (None, Some(error)) => error,
                        (None, None) => "rejected".into(),
                    },
                });
            }
            Ok(ServerMessage::Ping) => {
                ws_stream
                    .send(Message::Text(pong_frame()))
                    .await
                    .map_err(|e| RealtimeError::Protocol(e.to_string()))?;
            }
            Ok(other) => tracing::debug!(?other, "Ignoring frame while subscribing"),
            Err(e) => tracing::warn!(error = %e, "Unparseable frame while subscribing"),
        }
    }
    Err(RealtimeError::Closed)
}

/// Forward channel events until the socket drops or `cancel` fires.
async fn pump(
    conn: RealtimeConnection,
    channel: &str,
    notices: &mpsc::Sender<ChannelNotice>,
    cancel: &CancellationToken,
) -> PumpEnd {
    let activity_timeout = conn.activity_timeout;
    let (mut sink, mut stream) = conn.ws_stream.split();

    let idle = tokio::time::sleep(activity_timeout);
    tokio::pin!(idle);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = sink.send(Message::Text(unsubscribe_frame(channel))).await {
                    tracing::debug!(channel, error = %e, "Unsubscribe frame not sent");
                }
                if let Err(e) = sink.send(Message::Close(None)).await {
                    tracing::debug!(channel, error = %e, "Close frame not sent");
                }
                return PumpEnd::Cancelled;
            }

            _ = &mut idle => {
                if awaiting_pong {
                    return PumpEnd::Dropped("no pong from provider".into());
                }
                if let Err(e) = sink.send(Message::Text(ping_frame())).await {
                    return PumpEnd::Dropped(e.to_string());
                }
                awaiting_pong = true;
                idle.as_mut().reset(Instant::now() + PONG_TIMEOUT);
            }

            frame = stream.next() => {
                awaiting_pong = false;
                idle.as_mut().reset(Instant::now() + activity_timeout);

                let text = match frame {
                    None => return PumpEnd::Dropped("stream ended".into()),
                    Some(Err(e)) => return PumpEnd::Dropped(e.to_string()),
                    Some(Ok(Message::Close(_))) => return PumpEnd::Dropped("closed by provider".into()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };

                match parse_message(&text) {
                    Ok(ServerMessage::ChannelEvent { channel: from, event, data }) if from == channel => {
                        if notices.send(ChannelNotice::Event { event, data }).await.is_err() {
                            return PumpEnd::Cancelled;
                        }
                    }
                    Ok(ServerMessage::Ping) => {
                        if let Err(e) = sink.send(Message::Text(pong_frame())).await {
                            return PumpEnd::Dropped(e.to_string());
                        }
                    }
                    Ok(ServerMessage::Error { code: Some(code), message }) if is_fatal_code(code) => {
                        return PumpEnd::Fatal(format!("{code}: {}", message.unwrap_or_default()));
                    }
                    Ok(ServerMessage::Error { code, message }) => {
                        tracing::warn!(channel, ?code, ?message, "Provider error");
                    }
                    Ok(other) => tracing::trace!(?other, "Ignored frame"),
                    Err(e) => tracing::warn!(channel, error = %e, "Unparseable frame"),
                }
            }
        }
    }
}
