//! No-op cache backend, used when caching is disabled
//!
//! Writes are accepted and dropped; reads are empty. Subscribers simply get
//! no replay and scheduled delivery is unavailable.

use async_trait::async_trait;

use crate::domain::message::Message;

use super::{CacheError, MessageCache, Since};

pub struct NoopCache;

#[async_trait]
impl MessageCache for NoopCache {
    async fn add_message(&self, _message: &Message) -> Result<(), CacheError> {
        Ok(())
    }

    async fn messages(
        &self,
        _topic: &str,
        _since: Since,
        _include_scheduled: bool,
    ) -> Result<Vec<Message>, CacheError> {
        Ok(Vec::new())
    }

    async fn messages_due(&self) -> Result<Vec<Message>, CacheError> {
        Ok(Vec::new())
    }

    async fn mark_published(&self, _id: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn message_count(&self, _topic: &str) -> Result<usize, CacheError> {
        Ok(0)
    }

    async fn topics(&self) -> Result<Vec<String>, CacheError> {
        Ok(Vec::new())
    }

    async fn attachments_size(&self, _owner: &str) -> Result<u64, CacheError> {
        Ok(0)
    }

    async fn attachments_expired(&self) -> Result<Vec<String>, CacheError> {
        Ok(Vec::new())
    }

    async fn mark_attachments_deleted(&self, _ids: &[String]) -> Result<(), CacheError> {
        Ok(())
    }

    async fn prune(&self, _older_than: i64) -> Result<(), CacheError> {
        Ok(())
    }
}
