//! Durable SQLite cache backend
//!
//! A single-file store in WAL mode so replays keep working while publishes
//! write. Attachment metadata lives inline on the message row; the blobs
//! themselves are the file cache's business.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};

use crate::core::constants::{SQLITE_BUSY_TIMEOUT_SECS, SQLITE_MAX_CONNECTIONS};
use crate::domain::message::{Attachment, Message};

use super::schema::{SCHEMA, SCHEMA_VERSION};
use super::{CacheError, MessageCache, Since};

pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Open (or create) the cache file and bring the schema up to date
    pub async fn new(path: &Path) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS))
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(SQLITE_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;

        tracing::debug!(path = %path.display(), "Durable message cache opened");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message, CacheError> {
        let event: String = row.get("event");
        let tags: String = row.get("tags");
        let attachment = match row.get::<Option<String>, _>("attachment_url") {
            Some(url) => Some(Attachment {
                name: row.get::<Option<String>, _>("attachment_name").unwrap_or_default(),
                content_type: row.get::<Option<String>, _>("attachment_type").unwrap_or_default(),
                size: row.get::<Option<i64>, _>("attachment_size").unwrap_or(0),
                expires: row.get::<Option<i64>, _>("attachment_expires").unwrap_or(0),
                url,
                owner: row.get::<Option<String>, _>("attachment_owner").unwrap_or_default(),
            }),
            None => None,
        };
        Ok(Message {
            id: row.get("id"),
            time: row.get("time"),
            event: serde_json::from_value(serde_json::Value::String(event))?,
            topic: row.get("topic"),
            message: row.get("message"),
            title: row.get("title"),
            tags: serde_json::from_str(&tags)?,
            priority: row.get::<i64, _>("priority") as i8,
            click: row.get("click"),
            attachment,
            poll_id: row.get("poll_id"),
            sender: row.get("sender"),
        })
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), CacheError> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        tracing::debug!(version = SCHEMA_VERSION, "Initializing cache schema");
        let mut tx = pool.begin().await?;
        sqlx::query(SCHEMA).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_version (id, version, applied_at) VALUES (1, ?, ?)")
            .bind(SCHEMA_VERSION)
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        return Ok(());
    }

    let current: i32 = sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
        .fetch_optional(pool)
        .await?
        .unwrap_or(0);
    if current < SCHEMA_VERSION {
        // Future migrations slot in here; version 1 is the initial schema
        tracing::warn!(current, expected = SCHEMA_VERSION, "Unknown cache schema version");
    }
    Ok(())
}

const SELECT_COLUMNS: &str = "id, time, topic, event, message, title, priority, tags, click, \
     poll_id, sender, published, attachment_name, attachment_type, attachment_size, \
     attachment_expires, attachment_url, attachment_owner, attachment_deleted";

#[async_trait]
impl MessageCache for SqliteCache {
    async fn add_message(&self, message: &Message) -> Result<(), CacheError> {
        let published = message.time <= Utc::now().timestamp();
        let tags = serde_json::to_string(&message.tags)?;
        let attachment = message.attachment.as_ref();
        sqlx::query(
            "INSERT INTO messages (id, time, topic, event, message, title, priority, tags, \
             click, poll_id, sender, published, attachment_name, attachment_type, \
             attachment_size, attachment_expires, attachment_url, attachment_owner) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(message.time)
        .bind(&message.topic)
        .bind(message.event.as_str())
        .bind(&message.message)
        .bind(&message.title)
        .bind(message.priority as i64)
        .bind(tags)
        .bind(&message.click)
        .bind(&message.poll_id)
        .bind(&message.sender)
        .bind(published)
        .bind(attachment.map(|a| a.name.clone()))
        .bind(attachment.map(|a| a.content_type.clone()))
        .bind(attachment.map(|a| a.size))
        .bind(attachment.map(|a| a.expires))
        .bind(attachment.map(|a| a.url.clone()))
        .bind(attachment.map(|a| a.owner.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn messages(
        &self,
        topic: &str,
        since: Since,
        include_scheduled: bool,
    ) -> Result<Vec<Message>, CacheError> {
        let since_time = match since {
            Since::None => return Ok(Vec::new()),
            Since::All => i64::MIN,
            Since::Time(t) => t,
        };
        let sql = if include_scheduled {
            format!(
                "SELECT {SELECT_COLUMNS} FROM messages \
                 WHERE topic = ? AND time >= ? ORDER BY time, rowid"
            )
        } else {
            format!(
                "SELECT {SELECT_COLUMNS} FROM messages \
                 WHERE topic = ? AND time >= ? AND published = 1 ORDER BY time, rowid"
            )
        };
        let rows = sqlx::query(&sql)
            .bind(topic)
            .bind(since_time)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn messages_due(&self) -> Result<Vec<Message>, CacheError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM messages \
             WHERE published = 0 AND time <= ? ORDER BY time, rowid"
        );
        let rows = sqlx::query(&sql)
            .bind(Utc::now().timestamp())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn mark_published(&self, id: &str) -> Result<(), CacheError> {
        sqlx::query("UPDATE messages SET published = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn message_count(&self, topic: &str) -> Result<usize, CacheError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE topic = ?")
            .bind(topic)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn topics(&self) -> Result<Vec<String>, CacheError> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT DISTINCT topic FROM messages")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn attachments_size(&self, owner: &str) -> Result<u64, CacheError> {
        let size: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(attachment_size), 0) FROM messages \
             WHERE attachment_owner = ? AND attachment_deleted = 0",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(size.max(0) as u64)
    }

    async fn attachments_expired(&self) -> Result<Vec<String>, CacheError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM messages \
             WHERE attachment_expires IS NOT NULL AND attachment_expires != 0 \
             AND attachment_expires <= ? AND attachment_deleted = 0",
        )
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn mark_attachments_deleted(&self, ids: &[String]) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE messages SET attachment_deleted = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn prune(&self, older_than: i64) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM messages WHERE published = 1 AND time < ?")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;

    async fn cache() -> (tempfile::TempDir, SqliteCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteCache::new(&dir.path().join("cache.db")).await.unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn test_ordering_and_since() {
        let (_dir, cache) = cache().await;
        contract::ordering_and_since(&cache).await;
    }

    #[tokio::test]
    async fn test_insertion_order_breaks_time_ties() {
        let (_dir, cache) = cache().await;
        contract::insertion_order_breaks_time_ties(&cache).await;
    }

    #[tokio::test]
    async fn test_scheduled_lifecycle() {
        let (_dir, cache) = cache().await;
        contract::scheduled_lifecycle(&cache).await;
    }

    #[tokio::test]
    async fn test_prune_spares_scheduled() {
        let (_dir, cache) = cache().await;
        contract::prune_spares_scheduled(&cache).await;
    }

    #[tokio::test]
    async fn test_attachment_accounting() {
        let (_dir, cache) = cache().await;
        contract::attachment_accounting(&cache).await;
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_fields() {
        let (_dir, cache) = cache().await;
        contract::roundtrip_preserves_fields(&cache).await;
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let mut m = Message::new("persist");
        m.message = "still here".into();
        m.time = Utc::now().timestamp() - 1;
        {
            let cache = SqliteCache::new(&path).await.unwrap();
            cache.add_message(&m).await.unwrap();
            cache.close().await;
        }

        let cache = SqliteCache::new(&path).await.unwrap();
        let got = cache.messages("persist", Since::All, false).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message, "still here");
        assert_eq!(cache.topics().await.unwrap(), vec!["persist"]);
    }
}
