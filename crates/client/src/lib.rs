//! HTTP and real-time client for the social to-do backend.
//!
//! Provides the REST API wrapper with session-aware error handling, a
//! Pusher-protocol channel client with reconnection, and the per-list
//! view that reconciles both into one item collection.

pub mod api;
pub mod config;
pub mod list_view;
pub mod realtime;
