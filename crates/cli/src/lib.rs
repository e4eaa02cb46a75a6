//! `socialtodo` library crate.
//!
//! Re-exports the command layer and session file store for integration
//! testing. The binary entrypoint lives in `main.rs`.

pub mod commands;
pub mod render;
pub mod store;
