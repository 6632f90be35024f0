//! Broker: topic and visitor registries plus the background loops
//!
//! The registries sit behind broker-level mutexes with lookup-or-insert
//! critical sections only; fan-out callbacks are never invoked under them.
//! Three loops run for the broker's lifetime, each multiplexing its interval
//! timer against the shutdown signal: the manager (expiry, pruning, topic
//! eviction), the scheduled-delivery sender, and the push keepalive.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::AppConfig;
use crate::core::constants::{CONTROL_TOPIC, DISALLOWED_TOPICS};
use crate::data::cache::{CacheError, MessageCache};
use crate::data::files::FileCache;

use super::hooks::{Mailer, Pusher};
use super::message::Message;
use super::topic::Topic;
use super::visitor::Visitor;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid topic name: {0}")]
    InvalidTopicName(String),
    #[error("topic name is disallowed: {0}")]
    DisallowedTopicName(String),
    #[error("too many topics")]
    TooManyTopics,
}

/// Topic names are short path segments: 1..64 chars of [A-Za-z0-9_-]
pub fn valid_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub struct Broker {
    config: AppConfig,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    visitors: Mutex<HashMap<String, Arc<Visitor>>>,
    cache: Arc<dyn MessageCache>,
    file_cache: Option<Arc<FileCache>>,
    pusher: Option<Arc<dyn Pusher>>,
    mailer: Option<Arc<dyn Mailer>>,
    published_total: AtomicU64,
}

impl Broker {
    pub fn new(
        config: AppConfig,
        cache: Arc<dyn MessageCache>,
        file_cache: Option<Arc<FileCache>>,
        pusher: Option<Arc<dyn Pusher>>,
        mailer: Option<Arc<dyn Mailer>>,
    ) -> Self {
        Self {
            config,
            topics: Mutex::new(HashMap::new()),
            visitors: Mutex::new(HashMap::new()),
            cache,
            file_cache,
            pusher,
            mailer,
            published_total: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn MessageCache> {
        &self.cache
    }

    pub fn file_cache(&self) -> Option<&Arc<FileCache>> {
        self.file_cache.as_ref()
    }

    pub fn pusher(&self) -> Option<&Arc<dyn Pusher>> {
        self.pusher.as_ref()
    }

    pub fn mailer(&self) -> Option<&Arc<dyn Mailer>> {
        self.mailer.as_ref()
    }

    pub fn inc_published(&self) {
        self.published_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published_total(&self) -> u64 {
        self.published_total.load(Ordering::Relaxed)
    }

    /// Recreate topics that still hold cached messages (durable cache only)
    pub async fn restore_topics(&self) -> Result<(), CacheError> {
        let names = self.cache.topics().await?;
        if names.is_empty() {
            return Ok(());
        }
        let mut topics = self.topics.lock();
        for name in &names {
            topics
                .entry(name.clone())
                .or_insert_with(|| Arc::new(Topic::new(name)));
        }
        tracing::info!(count = names.len(), "Restored topics from cache");
        Ok(())
    }

    /// Look up or create a topic, enforcing name rules and the global limit
    pub fn topic(&self, name: &str) -> Result<Arc<Topic>, BrokerError> {
        if !valid_topic_name(name) {
            return Err(BrokerError::InvalidTopicName(name.to_string()));
        }
        if DISALLOWED_TOPICS.contains(&name) {
            return Err(BrokerError::DisallowedTopicName(name.to_string()));
        }
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get(name) {
            return Ok(Arc::clone(topic));
        }
        if topics.len() >= self.config.server.total_topic_limit {
            return Err(BrokerError::TooManyTopics);
        }
        let topic = Arc::new(Topic::new(name));
        topics.insert(name.to_string(), Arc::clone(&topic));
        Ok(topic)
    }

    pub fn topic_if_exists(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.lock().get(name).cloned()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }

    /// Look up or create the visitor for an identity key (IP)
    pub fn visitor(&self, ip: &str) -> Arc<Visitor> {
        let mut visitors = self.visitors.lock();
        if let Some(visitor) = visitors.get(ip) {
            return Arc::clone(visitor);
        }
        let visitor = Arc::new(Visitor::new(ip, &self.config.visitor));
        visitors.insert(ip.to_string(), Arc::clone(&visitor));
        visitor
    }

    pub fn visitor_count(&self) -> usize {
        self.visitors.lock().len()
    }

    // ========================================================================
    // Background loops
    // ========================================================================

    pub fn start_manager_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(broker.config.intervals.manager);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Manager task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => broker.manager_tick().await,
                }
            }
        })
    }

    pub fn start_at_sender_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(broker.config.intervals.at_sender);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Scheduled-delivery task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => broker.at_sender_tick().await,
                }
            }
        })
    }

    /// Only started when a push hook is configured
    pub fn start_push_keepalive_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(broker.config.intervals.push_keepalive);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Push keepalive task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Some(pusher) = &broker.pusher {
                            let keepalive = Message::keepalive(CONTROL_TOPIC);
                            if let Err(e) = pusher.push(&keepalive).await {
                                tracing::warn!(error = %e, "Push keepalive failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// One manager pass: expire visitors, drop expired attachments, prune
    /// the cache, evict empty topics, log a stats line. Errors are logged
    /// and never abort the pass.
    pub async fn manager_tick(&self) {
        let expired_visitors = {
            let mut visitors = self.visitors.lock();
            let before = visitors.len();
            visitors.retain(|_, v| !v.stale());
            before - visitors.len()
        };
        if expired_visitors > 0 {
            tracing::debug!(count = expired_visitors, "Expired stale visitors");
        }

        match self.cache.attachments_expired().await {
            Ok(ids) if !ids.is_empty() => {
                if let Some(file_cache) = &self.file_cache {
                    if let Err(e) = file_cache.remove(&ids).await {
                        tracing::warn!(error = %e, "Failed to delete expired attachments");
                    }
                }
                if let Err(e) = self.cache.mark_attachments_deleted(&ids).await {
                    tracing::warn!(error = %e, "Failed to mark attachments deleted");
                } else {
                    tracing::debug!(count = ids.len(), "Deleted expired attachments");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to list expired attachments"),
        }

        let older_than = Utc::now().timestamp() - self.config.cache.duration.as_secs() as i64;
        if let Err(e) = self.cache.prune(older_than).await {
            tracing::warn!(error = %e, "Cache prune failed");
        }

        self.evict_empty_topics().await;

        tracing::info!(
            published = self.published_total(),
            topics = self.topic_count(),
            visitors = self.visitor_count(),
            "Stats"
        );
    }

    /// Drop topics with no subscribers and no cached messages. The message
    /// count is read outside the registry lock; candidates are re-checked
    /// under the lock before removal.
    async fn evict_empty_topics(&self) {
        let idle: Vec<(String, Arc<Topic>)> = {
            let topics = self.topics.lock();
            topics
                .iter()
                .filter(|(_, t)| t.subscribers() == 0)
                .map(|(name, t)| (name.clone(), Arc::clone(t)))
                .collect()
        };

        let mut evictable = Vec::new();
        for (name, topic) in idle {
            match self.cache.message_count(&name).await {
                Ok(0) => evictable.push((name, topic)),
                Ok(_) => {}
                Err(e) => tracing::warn!(topic = %name, error = %e, "Message count failed"),
            }
        }

        if evictable.is_empty() {
            return;
        }
        let mut topics = self.topics.lock();
        let mut evicted = 0;
        for (name, topic) in evictable {
            // A subscriber may have arrived while counting
            if topic.subscribers() == 0 {
                topics.remove(&name);
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(count = evicted, "Evicted empty topics");
        }
    }

    /// One scheduled-delivery pass: fan out every due message, push if
    /// configured, then mark it published. Per-message failures do not
    /// abort the batch.
    pub async fn at_sender_tick(&self) {
        let due = match self.cache.messages_due().await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list due messages");
                return;
            }
        };
        for message in due {
            if let Err(e) = self.deliver_scheduled(&message).await {
                tracing::warn!(id = %message.id, error = %e, "Scheduled delivery failed");
            }
        }
    }

    async fn deliver_scheduled(&self, message: &Message) -> Result<(), CacheError> {
        if let Some(topic) = self.topic_if_exists(&message.topic) {
            topic.publish(&Arc::new(message.clone()));
        }
        if let Some(pusher) = &self.pusher {
            if let Err(e) = pusher.push(message).await {
                tracing::warn!(id = %message.id, error = %e, "Push of scheduled message failed");
            }
        }
        self.cache.mark_published(&message.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cli::Cli;
    use crate::data::cache::memory::MemoryCache;
    use crate::data::cache::noop::NoopCache;
    use clap::Parser;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> AppConfig {
        AppConfig::load(&Cli::try_parse_from(["beacon"]).unwrap()).unwrap()
    }

    fn broker_with_cache(cache: Arc<dyn MessageCache>) -> Arc<Broker> {
        Arc::new(Broker::new(test_config(), cache, None, None, None))
    }

    fn broker() -> Arc<Broker> {
        broker_with_cache(Arc::new(NoopCache))
    }

    #[test]
    fn test_valid_topic_names() {
        assert!(valid_topic_name("mytopic"));
        assert!(valid_topic_name("a"));
        assert!(valid_topic_name("up_DOWN-123"));
        assert!(!valid_topic_name(""));
        assert!(!valid_topic_name("has space"));
        assert!(!valid_topic_name("ünïcode"));
        assert!(!valid_topic_name(&"x".repeat(65)));
    }

    #[tokio::test]
    async fn test_topic_created_once() {
        let broker = broker();
        let a = broker.topic("mytopic").unwrap();
        let b = broker.topic("mytopic").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(broker.topic_count(), 1);
    }

    #[tokio::test]
    async fn test_disallowed_topic_rejected() {
        let broker = broker();
        assert!(matches!(
            broker.topic("docs"),
            Err(BrokerError::DisallowedTopicName(_))
        ));
        assert!(matches!(
            broker.topic("bad topic"),
            Err(BrokerError::InvalidTopicName(_))
        ));
    }

    #[tokio::test]
    async fn test_topic_limit_enforced() {
        let mut config = test_config();
        config.server.total_topic_limit = 2;
        let broker = Broker::new(config, Arc::new(NoopCache), None, None, None);
        broker.topic("a").unwrap();
        broker.topic("b").unwrap();
        assert!(matches!(broker.topic("c"), Err(BrokerError::TooManyTopics)));
        // Existing topics still resolve
        broker.topic("a").unwrap();
    }

    #[tokio::test]
    async fn test_visitor_identity() {
        let broker = broker();
        let a = broker.visitor("1.2.3.4");
        let b = broker.visitor("1.2.3.4");
        let c = broker.visitor("5.6.7.8");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(broker.visitor_count(), 2);
    }

    #[tokio::test]
    async fn test_manager_evicts_empty_topic() {
        let broker = broker_with_cache(Arc::new(MemoryCache::new()));
        broker.topic("empty").unwrap();
        assert_eq!(broker.topic_count(), 1);

        broker.manager_tick().await;
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_manager_keeps_topic_with_subscriber() {
        let broker = broker_with_cache(Arc::new(MemoryCache::new()));
        let topic = broker.topic("busy").unwrap();
        let _id = topic.subscribe(Arc::new(|_| Ok(())));

        broker.manager_tick().await;
        assert_eq!(broker.topic_count(), 1);
    }

    #[tokio::test]
    async fn test_manager_keeps_topic_with_cached_messages() {
        let cache = Arc::new(MemoryCache::new());
        let broker = broker_with_cache(cache.clone());
        broker.topic("cached").unwrap();

        let mut m = Message::new("cached");
        m.message = "hello".into();
        cache.add_message(&m).await.unwrap();

        broker.manager_tick().await;
        assert_eq!(broker.topic_count(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_message_delivered_exactly_once() {
        let cache = Arc::new(MemoryCache::new());
        let broker = broker_with_cache(cache.clone());
        let topic = broker.topic("sched").unwrap();

        let deliveries = Arc::new(AtomicUsize::new(0));
        let counter = deliveries.clone();
        topic.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        // Stored with a future delivery time, so not yet published
        let mut m = Message::new("sched");
        m.time = Utc::now().timestamp() + 1;
        m.message = "later".into();
        cache.add_message(&m).await.unwrap();

        broker.at_sender_tick().await;
        assert_eq!(deliveries.load(Ordering::SeqCst), 0);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        broker.at_sender_tick().await;
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);

        // Another pass must not re-deliver
        broker.at_sender_tick().await;
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_topics_from_cache() {
        let cache = Arc::new(MemoryCache::new());
        let mut m = Message::new("restored");
        m.message = "x".into();
        cache.add_message(&m).await.unwrap();

        let broker = broker_with_cache(cache);
        broker.restore_topics().await.unwrap();
        assert!(broker.topic_if_exists("restored").is_some());
    }
}
