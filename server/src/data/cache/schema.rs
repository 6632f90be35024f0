//! SQLite schema for the durable message cache

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    time INTEGER NOT NULL,
    topic TEXT NOT NULL CHECK(length(topic) >= 1 AND length(topic) <= 64),
    event TEXT NOT NULL,
    message TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    priority INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    click TEXT NOT NULL DEFAULT '',
    poll_id TEXT NOT NULL DEFAULT '',
    sender TEXT NOT NULL DEFAULT '',
    published INTEGER NOT NULL,
    attachment_name TEXT,
    attachment_type TEXT,
    attachment_size INTEGER,
    attachment_expires INTEGER,
    attachment_url TEXT,
    attachment_owner TEXT,
    attachment_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_topic_time ON messages(topic, time, published);
CREATE INDEX IF NOT EXISTS idx_messages_due ON messages(published, time);
CREATE INDEX IF NOT EXISTS idx_messages_attachment_owner ON messages(attachment_owner);
"#;
