//! Domain layer for the social to-do client.
//!
//! Zero I/O: models, response normalization, the per-list item
//! reconciler, the real-time event contract, form validation, and the
//! session controller. The `socialtodo-client` crate drives these over
//! HTTP and WebSocket.

pub mod error;
pub mod events;
pub mod forms;
pub mod models;
pub mod normalize;
pub mod reconciler;
pub mod session;
pub mod types;
