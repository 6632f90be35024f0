//! Application-wide constants and defaults

/// Application name
pub const APP_NAME: &str = "beacon";
/// Lowercase name used for the default log filter
pub const APP_NAME_LOWER: &str = "beacon";
/// Config file name looked up in the working directory or via --config
pub const CONFIG_FILE_NAME: &str = "beacon.json";

/// Env var for the log filter (falls back to RUST_LOG)
pub const ENV_LOG: &str = "BEACON_LOG";
pub const ENV_CONFIG: &str = "BEACON_CONFIG";
pub const ENV_LISTEN_HTTP: &str = "BEACON_LISTEN_HTTP";
pub const ENV_BASE_URL: &str = "BEACON_BASE_URL";
pub const ENV_CACHE_FILE: &str = "BEACON_CACHE_FILE";
pub const ENV_ATTACHMENT_CACHE_DIR: &str = "BEACON_ATTACHMENT_CACHE_DIR";
pub const ENV_BEHIND_PROXY: &str = "BEACON_BEHIND_PROXY";

/// Default HTTP bind address
pub const DEFAULT_LISTEN_HTTP: &str = "127.0.0.1:2586";

/// How long cached messages are kept around
pub const DEFAULT_CACHE_DURATION_SECS: u64 = 12 * 3600;

/// Max bytes of a request body treated as message text
pub const DEFAULT_MESSAGE_LIMIT: usize = 4096;
/// Global ceiling on live topics
pub const DEFAULT_TOTAL_TOPIC_LIMIT: usize = 15_000;

/// SSE/JSON/WebSocket keepalive cadence
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 45;
/// Manager loop cadence (visitor expiry, cache prune, topic eviction)
pub const DEFAULT_MANAGER_INTERVAL_SECS: u64 = 60;
/// Scheduled-delivery loop cadence
pub const DEFAULT_AT_SENDER_INTERVAL_SECS: u64 = 10;
/// Push-hook keepalive cadence
pub const DEFAULT_PUSH_KEEPALIVE_INTERVAL_SECS: u64 = 3 * 3600;

/// Bounds on scheduled ("delayed") delivery
pub const DEFAULT_MIN_DELAY_SECS: u64 = 10;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 3 * 24 * 3600;

/// Per-visitor request token bucket
pub const DEFAULT_VISITOR_REQUEST_LIMIT_BURST: i64 = 60;
pub const DEFAULT_VISITOR_REQUEST_LIMIT_REPLENISH_SECS: u64 = 5;
/// Per-visitor outbound e-mail token bucket
pub const DEFAULT_VISITOR_EMAIL_LIMIT_BURST: i64 = 16;
pub const DEFAULT_VISITOR_EMAIL_LIMIT_REPLENISH_SECS: u64 = 3600;
/// Max concurrent subscriptions per visitor
pub const DEFAULT_VISITOR_SUBSCRIPTION_LIMIT: i64 = 30;
/// Per-visitor attachment quotas
pub const DEFAULT_VISITOR_ATTACHMENT_TOTAL_SIZE_LIMIT: u64 = 100 * 1024 * 1024;
pub const DEFAULT_VISITOR_ATTACHMENT_DAILY_BANDWIDTH_LIMIT: u64 = 500 * 1024 * 1024;
/// Rolling window for the bandwidth limiter
pub const VISITOR_BANDWIDTH_WINDOW_SECS: u64 = 24 * 3600;
/// Floor for visitor staleness, regardless of bucket refill interval
pub const VISITOR_STALE_MIN_SECS: u64 = 30 * 60;

/// Global attachment file-cache sizing
pub const DEFAULT_ATTACHMENT_TOTAL_SIZE_LIMIT: u64 = 5 * 1024 * 1024 * 1024;
pub const DEFAULT_ATTACHMENT_FILE_SIZE_LIMIT: u64 = 15 * 1024 * 1024;
pub const DEFAULT_ATTACHMENT_EXPIRY_SECS: u64 = 3 * 3600;

/// Topic names that collide with HTTP routes and can never be topics
pub const DISALLOWED_TOPICS: &[&str] = &["docs", "static", "file"];

/// Reserved control topic for push-hook keepalives. The `~` prefix is outside
/// the public topic charset, so user topics can never collide with it.
pub const CONTROL_TOPIC: &str = "~control";

/// Bytes sniffed from an attachment body to detect its content type
pub const MIME_SNIFF_LEN: usize = 512;

/// Grace period on top of the keepalive interval before a WebSocket
/// connection without pongs is considered dead
pub const WS_PONG_GRACE_SECS: u64 = 15;

/// How long shutdown waits for background tasks before giving up
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// SQLite tuning for the durable message cache
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;
pub const SQLITE_MAX_CONNECTIONS: u32 = 4;
