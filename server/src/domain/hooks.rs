//! Contracts for the external delivery collaborators
//!
//! The mobile-push upstream and the outbound mailer live outside this crate;
//! the broker only knows these seams. Both are fire-and-forget from the
//! publish path: failures are logged, never surfaced to the publisher.

use async_trait::async_trait;

use super::message::Message;

/// Mobile-push upstream. Called on non-delayed publish (unless the caller
/// opted out) and on delivery of scheduled messages.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, message: &Message) -> anyhow::Result<()>;
}

/// Outbound mailer. Called on non-delayed publish when the `email`
/// parameter is set.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, sender_ip: &str, to: &str, message: &Message) -> anyhow::Result<()>;
}
