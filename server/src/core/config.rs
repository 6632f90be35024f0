//! Configuration loading and resolution
//!
//! Precedence: built-in defaults, then the JSON config file, then CLI
//! flags / environment. Durations are humantime strings ("45s", "12h").

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use super::cli::Cli;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_AT_SENDER_INTERVAL_SECS, DEFAULT_ATTACHMENT_EXPIRY_SECS,
    DEFAULT_ATTACHMENT_FILE_SIZE_LIMIT, DEFAULT_ATTACHMENT_TOTAL_SIZE_LIMIT,
    DEFAULT_CACHE_DURATION_SECS, DEFAULT_KEEPALIVE_INTERVAL_SECS, DEFAULT_LISTEN_HTTP,
    DEFAULT_MANAGER_INTERVAL_SECS, DEFAULT_MAX_DELAY_SECS, DEFAULT_MESSAGE_LIMIT,
    DEFAULT_MIN_DELAY_SECS, DEFAULT_PUSH_KEEPALIVE_INTERVAL_SECS, DEFAULT_TOTAL_TOPIC_LIMIT,
    DEFAULT_VISITOR_ATTACHMENT_DAILY_BANDWIDTH_LIMIT, DEFAULT_VISITOR_ATTACHMENT_TOTAL_SIZE_LIMIT,
    DEFAULT_VISITOR_EMAIL_LIMIT_BURST, DEFAULT_VISITOR_EMAIL_LIMIT_REPLENISH_SECS,
    DEFAULT_VISITOR_REQUEST_LIMIT_BURST, DEFAULT_VISITOR_REQUEST_LIMIT_REPLENISH_SECS,
    DEFAULT_VISITOR_SUBSCRIPTION_LIMIT,
};

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_http: String,
    pub listen_https: Option<String>,
    pub listen_unix: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Absolute root used to build attachment URLs
    pub base_url: Option<String>,
    pub behind_proxy: bool,
    pub message_limit: usize,
    pub total_topic_limit: usize,
    pub keepalive_interval: Duration,
}

/// Message cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Durable cache path; in-memory cache when unset
    pub file: Option<PathBuf>,
    pub duration: Duration,
}

/// Attachment file-cache configuration
#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    /// Blob directory; attachments disabled when unset
    pub cache_dir: Option<PathBuf>,
    pub total_size_limit: u64,
    pub file_size_limit: u64,
    pub expiry_duration: Duration,
}

impl AttachmentConfig {
    pub fn enabled(&self) -> bool {
        self.cache_dir.is_some()
    }
}

/// Per-visitor limits
#[derive(Debug, Clone)]
pub struct VisitorConfig {
    pub request_limit_burst: i64,
    pub request_limit_replenish: Duration,
    pub email_limit_burst: i64,
    pub email_limit_replenish: Duration,
    pub subscription_limit: i64,
    pub attachment_total_size_limit: u64,
    pub attachment_daily_bandwidth_limit: u64,
}

/// Background loop cadences
#[derive(Debug, Clone)]
pub struct IntervalConfig {
    pub manager: Duration,
    pub at_sender: Duration,
    pub push_keepalive: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub attachments: AttachmentConfig,
    pub visitor: VisitorConfig,
    pub intervals: IntervalConfig,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

/// Raw config file shape; every field optional so partial files work
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileConfig {
    listen_http: Option<String>,
    listen_https: Option<String>,
    listen_unix: Option<PathBuf>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    base_url: Option<String>,
    behind_proxy: Option<bool>,
    message_limit: Option<usize>,
    total_topic_limit: Option<usize>,
    keepalive_interval: Option<String>,
    cache_file: Option<PathBuf>,
    cache_duration: Option<String>,
    attachment_cache_dir: Option<PathBuf>,
    attachment_total_size_limit: Option<u64>,
    attachment_file_size_limit: Option<u64>,
    attachment_expiry_duration: Option<String>,
    visitor_attachment_total_size_limit: Option<u64>,
    visitor_attachment_daily_bandwidth_limit: Option<u64>,
    visitor_request_limit_burst: Option<i64>,
    visitor_request_limit_replenish: Option<String>,
    visitor_email_limit_burst: Option<i64>,
    visitor_email_limit_replenish: Option<String>,
    visitor_subscription_limit: Option<i64>,
    manager_interval: Option<String>,
    at_sender_interval: Option<String>,
    push_keepalive_interval: Option<String>,
    min_delay: Option<String>,
    max_delay: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Parse a humantime duration string, carrying the option name in errors
fn parse_duration(option: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .with_context(|| format!("Invalid duration for {}: {:?}", option, value))
}

fn resolve_duration(
    option: &str,
    cli: &Option<String>,
    file: &Option<String>,
    default_secs: u64,
) -> Result<Duration> {
    match cli.as_deref().or(file.as_deref()) {
        Some(s) => parse_duration(option, s),
        None => Ok(Duration::from_secs(default_secs)),
    }
}

impl AppConfig {
    /// Load and resolve the configuration from CLI flags and the optional
    /// config file (`--config`, or ./beacon.json if present).
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => {
                let local = PathBuf::from(CONFIG_FILE_NAME);
                if local.exists() {
                    FileConfig::load(&local)?
                } else {
                    FileConfig::default()
                }
            }
        };

        let config = Self {
            server: ServerConfig {
                listen_http: cli
                    .listen_http
                    .clone()
                    .or(file.listen_http)
                    .unwrap_or_else(|| DEFAULT_LISTEN_HTTP.to_string()),
                listen_https: cli.listen_https.clone().or(file.listen_https),
                listen_unix: cli.listen_unix.clone().or(file.listen_unix),
                cert_file: cli.cert_file.clone().or(file.cert_file),
                key_file: cli.key_file.clone().or(file.key_file),
                base_url: cli.base_url.clone().or(file.base_url),
                behind_proxy: cli.behind_proxy || file.behind_proxy.unwrap_or(false),
                message_limit: cli
                    .message_limit
                    .or(file.message_limit)
                    .unwrap_or(DEFAULT_MESSAGE_LIMIT),
                total_topic_limit: cli
                    .total_topic_limit
                    .or(file.total_topic_limit)
                    .unwrap_or(DEFAULT_TOTAL_TOPIC_LIMIT),
                keepalive_interval: resolve_duration(
                    "keepalive-interval",
                    &cli.keepalive_interval,
                    &file.keepalive_interval,
                    DEFAULT_KEEPALIVE_INTERVAL_SECS,
                )?,
            },
            cache: CacheConfig {
                file: cli.cache_file.clone().or(file.cache_file),
                duration: resolve_duration(
                    "cache-duration",
                    &cli.cache_duration,
                    &file.cache_duration,
                    DEFAULT_CACHE_DURATION_SECS,
                )?,
            },
            attachments: AttachmentConfig {
                cache_dir: cli.attachment_cache_dir.clone().or(file.attachment_cache_dir),
                total_size_limit: cli
                    .attachment_total_size_limit
                    .or(file.attachment_total_size_limit)
                    .unwrap_or(DEFAULT_ATTACHMENT_TOTAL_SIZE_LIMIT),
                file_size_limit: cli
                    .attachment_file_size_limit
                    .or(file.attachment_file_size_limit)
                    .unwrap_or(DEFAULT_ATTACHMENT_FILE_SIZE_LIMIT),
                expiry_duration: resolve_duration(
                    "attachment-expiry-duration",
                    &cli.attachment_expiry_duration,
                    &file.attachment_expiry_duration,
                    DEFAULT_ATTACHMENT_EXPIRY_SECS,
                )?,
            },
            visitor: VisitorConfig {
                request_limit_burst: cli
                    .visitor_request_limit_burst
                    .or(file.visitor_request_limit_burst)
                    .unwrap_or(DEFAULT_VISITOR_REQUEST_LIMIT_BURST),
                request_limit_replenish: resolve_duration(
                    "visitor-request-limit-replenish",
                    &cli.visitor_request_limit_replenish,
                    &file.visitor_request_limit_replenish,
                    DEFAULT_VISITOR_REQUEST_LIMIT_REPLENISH_SECS,
                )?,
                email_limit_burst: cli
                    .visitor_email_limit_burst
                    .or(file.visitor_email_limit_burst)
                    .unwrap_or(DEFAULT_VISITOR_EMAIL_LIMIT_BURST),
                email_limit_replenish: resolve_duration(
                    "visitor-email-limit-replenish",
                    &cli.visitor_email_limit_replenish,
                    &file.visitor_email_limit_replenish,
                    DEFAULT_VISITOR_EMAIL_LIMIT_REPLENISH_SECS,
                )?,
                subscription_limit: cli
                    .visitor_subscription_limit
                    .or(file.visitor_subscription_limit)
                    .unwrap_or(DEFAULT_VISITOR_SUBSCRIPTION_LIMIT),
                attachment_total_size_limit: cli
                    .visitor_attachment_total_size_limit
                    .or(file.visitor_attachment_total_size_limit)
                    .unwrap_or(DEFAULT_VISITOR_ATTACHMENT_TOTAL_SIZE_LIMIT),
                attachment_daily_bandwidth_limit: cli
                    .visitor_attachment_daily_bandwidth_limit
                    .or(file.visitor_attachment_daily_bandwidth_limit)
                    .unwrap_or(DEFAULT_VISITOR_ATTACHMENT_DAILY_BANDWIDTH_LIMIT),
            },
            intervals: IntervalConfig {
                manager: resolve_duration(
                    "manager-interval",
                    &cli.manager_interval,
                    &file.manager_interval,
                    DEFAULT_MANAGER_INTERVAL_SECS,
                )?,
                at_sender: resolve_duration(
                    "at-sender-interval",
                    &cli.at_sender_interval,
                    &file.at_sender_interval,
                    DEFAULT_AT_SENDER_INTERVAL_SECS,
                )?,
                push_keepalive: resolve_duration(
                    "push-keepalive-interval",
                    &cli.push_keepalive_interval,
                    &file.push_keepalive_interval,
                    DEFAULT_PUSH_KEEPALIVE_INTERVAL_SECS,
                )?,
            },
            min_delay: resolve_duration(
                "min-delay",
                &cli.min_delay,
                &file.min_delay,
                DEFAULT_MIN_DELAY_SECS,
            )?,
            max_delay: resolve_duration(
                "max-delay",
                &cli.max_delay,
                &file.max_delay,
                DEFAULT_MAX_DELAY_SECS,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.min_delay > self.max_delay {
            bail!("min-delay must not exceed max-delay");
        }
        if self.server.message_limit == 0 {
            bail!("message-limit must be positive");
        }
        if let Some(base) = &self.server.base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                bail!("base-url must start with http:// or https://");
            }
        }
        if self.server.listen_https.is_some()
            && (self.server.cert_file.is_none() || self.server.key_file.is_none())
        {
            bail!("listen-https requires cert-file and key-file");
        }
        Ok(())
    }

    /// Base URL with any trailing slash removed
    pub fn base_url_trimmed(&self) -> Option<&str> {
        self.server
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
    }
}
