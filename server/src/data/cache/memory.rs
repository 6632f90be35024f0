//! In-memory cache backend
//!
//! Per-topic entry lists under one mutex. Suitable for single-process
//! deployments that can afford to lose replay history on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::domain::message::Message;

use super::{CacheError, MessageCache, Since};

struct Entry {
    message: Message,
    published: bool,
    attachment_deleted: bool,
}

#[derive(Default)]
pub struct MemoryCache {
    topics: Mutex<HashMap<String, Vec<Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageCache for MemoryCache {
    async fn add_message(&self, message: &Message) -> Result<(), CacheError> {
        let published = message.time <= Utc::now().timestamp();
        let mut topics = self.topics.lock();
        topics.entry(message.topic.clone()).or_default().push(Entry {
            message: message.clone(),
            published,
            attachment_deleted: false,
        });
        Ok(())
    }

    async fn messages(
        &self,
        topic: &str,
        since: Since,
        include_scheduled: bool,
    ) -> Result<Vec<Message>, CacheError> {
        if since == Since::None {
            return Ok(Vec::new());
        }
        let topics = self.topics.lock();
        let mut matched: Vec<Message> = topics
            .get(topic)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.published || include_scheduled)
                    .filter(|e| since.includes(e.message.time))
                    .map(|e| e.message.clone())
                    .collect()
            })
            .unwrap_or_default();
        // Entries are kept in insertion order; a stable sort by time yields
        // the contract's tie-breaking.
        matched.sort_by_key(|m| m.time);
        Ok(matched)
    }

    async fn messages_due(&self) -> Result<Vec<Message>, CacheError> {
        let now = Utc::now().timestamp();
        let topics = self.topics.lock();
        let mut due: Vec<Message> = topics
            .values()
            .flatten()
            .filter(|e| !e.published && e.message.time <= now)
            .map(|e| e.message.clone())
            .collect();
        due.sort_by_key(|m| m.time);
        Ok(due)
    }

    async fn mark_published(&self, id: &str) -> Result<(), CacheError> {
        let mut topics = self.topics.lock();
        for entries in topics.values_mut() {
            if let Some(entry) = entries.iter_mut().find(|e| e.message.id == id) {
                entry.published = true;
                return Ok(());
            }
        }
        Ok(())
    }

    async fn message_count(&self, topic: &str) -> Result<usize, CacheError> {
        Ok(self.topics.lock().get(topic).map_or(0, Vec::len))
    }

    async fn topics(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .topics
            .lock()
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn attachments_size(&self, owner: &str) -> Result<u64, CacheError> {
        let topics = self.topics.lock();
        let total: i64 = topics
            .values()
            .flatten()
            .filter(|e| !e.attachment_deleted)
            .filter_map(|e| e.message.attachment.as_ref())
            .filter(|a| a.owner == owner)
            .map(|a| a.size)
            .sum();
        Ok(total.max(0) as u64)
    }

    async fn attachments_expired(&self) -> Result<Vec<String>, CacheError> {
        let now = Utc::now().timestamp();
        let topics = self.topics.lock();
        Ok(topics
            .values()
            .flatten()
            .filter(|e| !e.attachment_deleted)
            .filter(|e| {
                e.message
                    .attachment
                    .as_ref()
                    .is_some_and(|a| a.expires != 0 && a.expires <= now)
            })
            .map(|e| e.message.id.clone())
            .collect())
    }

    async fn mark_attachments_deleted(&self, ids: &[String]) -> Result<(), CacheError> {
        let mut topics = self.topics.lock();
        for entries in topics.values_mut() {
            for entry in entries.iter_mut() {
                if ids.contains(&entry.message.id) {
                    entry.attachment_deleted = true;
                }
            }
        }
        Ok(())
    }

    async fn prune(&self, older_than: i64) -> Result<(), CacheError> {
        let mut topics = self.topics.lock();
        for entries in topics.values_mut() {
            entries.retain(|e| !e.published || e.message.time >= older_than);
        }
        topics.retain(|_, entries| !entries.is_empty());
        Ok(())
    }
}
