//! beacon: a lightweight HTTP-native publish/subscribe notification broker
//!
//! Publishers PUT/POST short messages (and optional attachments) to named
//! topics; subscribers receive them over SSE, newline-delimited JSON, raw
//! text, or WebSocket streams, or via short polls. Topics exist on first
//! use; no registration or accounts.

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;

pub use app::CoreApp;
