//! Message envelope and attachment model
//!
//! The wire shape is newline-delimited JSON; empty optional fields are
//! omitted so `open`/`keepalive` frames stay small.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::utils::id;

/// Event kind carried in the `event` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Open,
    Keepalive,
    Message,
    PollRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Keepalive => "keepalive",
            EventKind::Message => "message",
            EventKind::PollRequest => "poll_request",
        }
    }
}

/// Priority range is 1 (min) to 5 (urgent); 0 means unset.
pub const PRIORITY_UNSET: i8 = 0;
pub const PRIORITY_MIN: i8 = 1;
pub const PRIORITY_DEFAULT: i8 = 3;
pub const PRIORITY_MAX: i8 = 5;

/// File attachment reference carried on a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub size: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub expires: i64,
    pub url: String,
    /// Sender IP for quota accounting; locally stored attachments only.
    /// Never serialized to the wire.
    #[serde(skip)]
    pub owner: String,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_i8(v: &i8) -> bool {
    *v == 0
}

/// One publish event. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Unix seconds; creation time, or delivery time for scheduled messages
    pub time: i64,
    pub event: EventKind,
    pub topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero_i8")]
    pub priority: i8,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub click: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Correlates a push notification with a later poll for the real message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub poll_id: String,
    /// Sender identity, for rate limiting on delayed delivery. Not on the wire.
    #[serde(skip)]
    pub sender: String,
}

impl Message {
    /// A fresh `message` event on the given topic
    pub fn new(topic: &str) -> Self {
        Self {
            id: id::random_id(),
            time: Utc::now().timestamp(),
            event: EventKind::Message,
            topic: topic.to_string(),
            message: String::new(),
            title: String::new(),
            tags: Vec::new(),
            priority: PRIORITY_UNSET,
            click: String::new(),
            attachment: None,
            poll_id: String::new(),
            sender: String::new(),
        }
    }

    pub fn open(topic: &str) -> Self {
        Self {
            event: EventKind::Open,
            ..Self::new(topic)
        }
    }

    pub fn keepalive(topic: &str) -> Self {
        Self {
            event: EventKind::Keepalive,
            ..Self::new(topic)
        }
    }

    pub fn poll_request(topic: &str, poll_id: &str) -> Self {
        Self {
            event: EventKind::PollRequest,
            poll_id: poll_id.to_string(),
            ..Self::new(topic)
        }
    }

    /// Priority with 0 normalized to the default, for filtering
    pub fn effective_priority(&self) -> i8 {
        if self.priority == PRIORITY_UNSET {
            PRIORITY_DEFAULT
        } else {
            self.priority
        }
    }

    /// Whether the delivery time lies in the future
    pub fn is_scheduled(&self) -> bool {
        self.time > Utc::now().timestamp()
    }
}

/// Parse a priority parameter: numeric 1..5 or a well-known name
pub fn parse_priority(value: &str) -> Option<i8> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Some(PRIORITY_UNSET),
        "1" | "min" => Some(1),
        "2" | "low" => Some(2),
        "3" | "default" => Some(3),
        "4" | "high" => Some(4),
        "5" | "max" | "urgent" => Some(5),
        _ => None,
    }
}
