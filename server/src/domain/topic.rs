//! Topic fan-out primitive
//!
//! A topic is a map of live subscriber callbacks. Publish snapshots the
//! callback list under the lock and invokes every callback outside of it, so
//! a slow subscriber can never stall the publisher or its peers. A
//! subscriber that leaves mid-publish may still see one in-flight message.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::message::Message;

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("subscriber connection closed")]
    SubscriberGone,
}

/// Delivery callback. HTTP subscribers forward into their own channel here,
/// so invocation is cheap and non-blocking.
pub type SubscriberFn = Arc<dyn Fn(Arc<Message>) -> Result<(), TopicError> + Send + Sync>;

struct TopicInner {
    next_id: u64,
    subscribers: HashMap<u64, SubscriberFn>,
}

pub struct Topic {
    name: String,
    inner: Mutex<TopicInner>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(TopicInner {
                next_id: 0,
                subscribers: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a callback; the returned id is unique for this topic's lifetime
    pub fn subscribe(&self, callback: SubscriberFn) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, callback);
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
    }

    /// Deliver to all current subscribers. Callback errors are logged and
    /// ignored; the topic tracks no delivery state.
    pub fn publish(&self, message: &Arc<Message>) {
        let snapshot: Vec<(u64, SubscriberFn)> = {
            let inner = self.inner.lock();
            inner
                .subscribers
                .iter()
                .map(|(id, cb)| (*id, Arc::clone(cb)))
                .collect()
        };

        for (id, callback) in snapshot {
            if let Err(e) = callback(Arc::clone(message)) {
                tracing::debug!(
                    topic = %self.name,
                    subscriber = id,
                    error = %e,
                    "Subscriber delivery failed"
                );
            }
        }
    }

    pub fn subscribers(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}
