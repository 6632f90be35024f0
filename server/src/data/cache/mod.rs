//! Message cache: replayable per-topic message store
//!
//! Three interchangeable backends behind one contract: no-op (cache
//! disabled), in-memory, and durable SQLite. A cache entry is a message plus
//! a `published` flag; scheduled messages are stored unpublished and flipped
//! exactly once by the scheduled-delivery loop. All backends run the same
//! contract test suite.

pub mod memory;
pub mod noop;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::message::Message;

pub use memory::MemoryCache;
pub use noop::NoopCache;
pub use sqlite::SqliteCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Replay cursor. Streaming subscribers default to `None` (no backfill);
/// polls default to `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Since {
    /// Replay nothing
    None,
    /// Replay everything cached
    All,
    /// Replay messages with `time >=` the given unix timestamp
    Time(i64),
}

impl Since {
    pub fn includes(&self, time: i64) -> bool {
        match self {
            Since::None => false,
            Since::All => true,
            Since::Time(t) => time >= *t,
        }
    }
}

/// Contract shared by all cache backends. Entries are returned in
/// non-decreasing `time`, ties broken by insertion order.
#[async_trait]
pub trait MessageCache: Send + Sync {
    /// Store a message. A message whose time lies in the future is stored
    /// with `published = false` and withheld until the scheduler flips it.
    async fn add_message(&self, message: &Message) -> Result<(), CacheError>;

    /// Cached messages for a topic matching `since`. Unpublished (scheduled)
    /// entries are excluded unless `include_scheduled` is set.
    async fn messages(
        &self,
        topic: &str,
        since: Since,
        include_scheduled: bool,
    ) -> Result<Vec<Message>, CacheError>;

    /// Scheduled messages whose delivery time has arrived
    async fn messages_due(&self) -> Result<Vec<Message>, CacheError>;

    /// Flip a scheduled message to published
    async fn mark_published(&self, id: &str) -> Result<(), CacheError>;

    /// Number of cached entries for a topic (scheduled included)
    async fn message_count(&self, topic: &str) -> Result<usize, CacheError>;

    /// Topic names with at least one cached entry, for restore on startup
    async fn topics(&self) -> Result<Vec<String>, CacheError>;

    /// Total bytes of live attachments stored by an owner
    async fn attachments_size(&self, owner: &str) -> Result<u64, CacheError>;

    /// Ids of messages whose attachment has expired and is not yet deleted
    async fn attachments_expired(&self) -> Result<Vec<String>, CacheError>;

    /// Record that the attachment blobs for these ids were deleted
    async fn mark_attachments_deleted(&self, ids: &[String]) -> Result<(), CacheError>;

    /// Drop published entries older than the given unix timestamp.
    /// Scheduled entries are exempt until delivered.
    async fn prune(&self, older_than: i64) -> Result<(), CacheError>;
}

/// Contract test suite run against every backend
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::domain::message::Attachment;
    use chrono::Utc;

    fn message(topic: &str, text: &str, time: i64) -> Message {
        let mut m = Message::new(topic);
        m.message = text.to_string();
        m.time = time;
        m
    }

    fn with_attachment(topic: &str, owner: &str, size: i64, expires: i64) -> Message {
        let mut m = message(topic, "file", Utc::now().timestamp() - 10);
        m.attachment = Some(Attachment {
            name: "f.bin".into(),
            content_type: "application/octet-stream".into(),
            size,
            expires,
            url: "http://localhost/file/x".into(),
            owner: owner.into(),
        });
        m
    }

    pub async fn ordering_and_since(cache: &dyn MessageCache) {
        let now = Utc::now().timestamp();
        let m1 = message("t", "first", now - 30);
        let m2 = message("t", "second", now - 20);
        let m3 = message("t", "third", now - 10);
        let other = message("other", "elsewhere", now - 20);
        for m in [&m1, &m2, &m3, &other] {
            cache.add_message(m).await.unwrap();
        }

        let all = cache.messages("t", Since::All, false).await.unwrap();
        assert_eq!(
            all.iter().map(|m| m.message.as_str()).collect::<Vec<_>>(),
            ["first", "second", "third"]
        );

        let recent = cache
            .messages("t", Since::Time(now - 20), false)
            .await
            .unwrap();
        assert_eq!(
            recent.iter().map(|m| m.message.as_str()).collect::<Vec<_>>(),
            ["second", "third"]
        );

        assert!(cache.messages("t", Since::None, false).await.unwrap().is_empty());
        assert_eq!(cache.message_count("t").await.unwrap(), 3);
        assert_eq!(cache.message_count("other").await.unwrap(), 1);

        let mut topics = cache.topics().await.unwrap();
        topics.sort();
        assert_eq!(topics, ["other", "t"]);
    }

    pub async fn insertion_order_breaks_time_ties(cache: &dyn MessageCache) {
        let now = Utc::now().timestamp();
        let m1 = message("t", "a", now - 5);
        let m2 = message("t", "b", now - 5);
        cache.add_message(&m1).await.unwrap();
        cache.add_message(&m2).await.unwrap();

        let all = cache.messages("t", Since::All, false).await.unwrap();
        assert_eq!(
            all.iter().map(|m| m.message.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
    }

    pub async fn scheduled_lifecycle(cache: &dyn MessageCache) {
        let now = Utc::now().timestamp();
        let live = message("t", "live", now - 5);
        let scheduled = message("t", "later", now + 1);
        cache.add_message(&live).await.unwrap();
        cache.add_message(&scheduled).await.unwrap();

        // Hidden from normal reads, visible with the scheduled flag
        let visible = cache.messages("t", Since::All, false).await.unwrap();
        assert_eq!(visible.len(), 1);
        let with_scheduled = cache.messages("t", Since::All, true).await.unwrap();
        assert_eq!(with_scheduled.len(), 2);

        // Not due yet
        assert!(cache.messages_due().await.unwrap().is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let due = cache.messages_due().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, "later");

        cache.mark_published(&due[0].id).await.unwrap();
        assert!(cache.messages_due().await.unwrap().is_empty());

        // Now visible to everyone
        let visible = cache.messages("t", Since::All, false).await.unwrap();
        assert_eq!(visible.len(), 2);
    }

    pub async fn prune_spares_scheduled(cache: &dyn MessageCache) {
        let now = Utc::now().timestamp();
        let old = message("t", "old", now - 1000);
        let fresh = message("t", "fresh", now - 10);
        let scheduled = message("t", "later", now + 500);
        for m in [&old, &fresh, &scheduled] {
            cache.add_message(m).await.unwrap();
        }

        cache.prune(now - 100).await.unwrap();

        let remaining = cache.messages("t", Since::All, true).await.unwrap();
        let texts: Vec<_> = remaining.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, ["fresh", "later"]);
    }

    pub async fn attachment_accounting(cache: &dyn MessageCache) {
        let now = Utc::now().timestamp();
        let live = with_attachment("t", "1.2.3.4", 100, now + 600);
        let expired = with_attachment("t", "1.2.3.4", 50, now - 60);
        let foreign = with_attachment("t", "5.6.7.8", 9000, now + 600);
        for m in [&live, &expired, &foreign] {
            cache.add_message(m).await.unwrap();
        }

        assert_eq!(cache.attachments_size("1.2.3.4").await.unwrap(), 150);

        let expired_ids = cache.attachments_expired().await.unwrap();
        assert_eq!(expired_ids, vec![expired.id.clone()]);

        cache.mark_attachments_deleted(&expired_ids).await.unwrap();
        assert!(cache.attachments_expired().await.unwrap().is_empty());
        assert_eq!(cache.attachments_size("1.2.3.4").await.unwrap(), 100);
    }

    pub async fn roundtrip_preserves_fields(cache: &dyn MessageCache) {
        let mut m = message("t", "full", Utc::now().timestamp() - 1);
        m.title = "title".into();
        m.priority = 4;
        m.tags = vec!["warn".into(), "backup".into()];
        m.click = "https://example.com".into();
        m.sender = "9.9.9.9".into();
        cache.add_message(&m).await.unwrap();

        let got = cache.messages("t", Since::All, false).await.unwrap();
        assert_eq!(got.len(), 1);
        let got = &got[0];
        assert_eq!(got.id, m.id);
        assert_eq!(got.title, "title");
        assert_eq!(got.priority, 4);
        assert_eq!(got.tags, vec!["warn", "backup"]);
        assert_eq!(got.click, "https://example.com");
        assert_eq!(got.sender, "9.9.9.9");
    }
}
