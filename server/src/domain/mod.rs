//! Broker domain: messages, topics, visitors, limiters, delivery hooks

pub mod broker;
pub mod hooks;
pub mod message;
pub mod rate;
pub mod topic;
pub mod visitor;

pub use broker::{Broker, BrokerError};
pub use hooks::{Mailer, Pusher};
pub use message::{Attachment, EventKind, Message};
pub use topic::{SubscriberFn, Topic, TopicError};
pub use visitor::Visitor;
