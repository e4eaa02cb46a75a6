//! Real-time channel support: Pusher protocol frames, the socket client,
//! reconnection backoff, and per-channel subscriptions.

pub mod client;
pub mod messages;
pub mod reconnect;
pub mod subscription;

pub use client::{RealtimeClient, RealtimeError};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use subscription::{ChannelNotice, ChannelSubscription, SubscriptionState};
