use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::constants::{
    ENV_ATTACHMENT_CACHE_DIR, ENV_BASE_URL, ENV_BEHIND_PROXY, ENV_CACHE_FILE, ENV_CONFIG,
    ENV_LISTEN_HTTP,
};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(version, about = "Simple HTTP pub/sub notification server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// HTTP listen address, e.g. 127.0.0.1:2586
    #[arg(long = "listen-http", global = true, env = ENV_LISTEN_HTTP)]
    pub listen_http: Option<String>,

    /// HTTPS listen address (requires cert-file and key-file)
    #[arg(long = "listen-https", global = true)]
    pub listen_https: Option<String>,

    /// Unix socket path to listen on
    #[arg(long = "listen-unix", global = true)]
    pub listen_unix: Option<PathBuf>,

    /// TLS certificate file
    #[arg(long = "cert-file", global = true)]
    pub cert_file: Option<PathBuf>,

    /// TLS key file
    #[arg(long = "key-file", global = true)]
    pub key_file: Option<PathBuf>,

    /// Absolute base URL used to build attachment URLs, e.g. https://beacon.example.com
    #[arg(long = "base-url", global = true, env = ENV_BASE_URL)]
    pub base_url: Option<String>,

    /// Path to the durable message cache; in-memory cache if unset
    #[arg(long = "cache-file", global = true, env = ENV_CACHE_FILE)]
    pub cache_file: Option<PathBuf>,

    /// How long cached messages are kept, e.g. 12h
    #[arg(long = "cache-duration", global = true)]
    pub cache_duration: Option<String>,

    /// Directory for attachment blobs; attachments disabled if unset
    #[arg(long = "attachment-cache-dir", global = true, env = ENV_ATTACHMENT_CACHE_DIR)]
    pub attachment_cache_dir: Option<PathBuf>,

    /// Global cap on attachment disk usage in bytes
    #[arg(long = "attachment-total-size-limit", global = true)]
    pub attachment_total_size_limit: Option<u64>,

    /// Per-file attachment size cap in bytes
    #[arg(long = "attachment-file-size-limit", global = true)]
    pub attachment_file_size_limit: Option<u64>,

    /// How long attachments are kept, e.g. 3h
    #[arg(long = "attachment-expiry-duration", global = true)]
    pub attachment_expiry_duration: Option<String>,

    /// Per-visitor cap on stored attachment bytes
    #[arg(long = "visitor-attachment-total-size-limit", global = true)]
    pub visitor_attachment_total_size_limit: Option<u64>,

    /// Per-visitor attachment bandwidth per rolling day, in bytes
    #[arg(long = "visitor-attachment-daily-bandwidth-limit", global = true)]
    pub visitor_attachment_daily_bandwidth_limit: Option<u64>,

    /// Request token bucket burst per visitor
    #[arg(long = "visitor-request-limit-burst", global = true)]
    pub visitor_request_limit_burst: Option<i64>,

    /// Request token bucket replenish interval, e.g. 5s
    #[arg(long = "visitor-request-limit-replenish", global = true)]
    pub visitor_request_limit_replenish: Option<String>,

    /// E-mail token bucket burst per visitor
    #[arg(long = "visitor-email-limit-burst", global = true)]
    pub visitor_email_limit_burst: Option<i64>,

    /// E-mail token bucket replenish interval, e.g. 1h
    #[arg(long = "visitor-email-limit-replenish", global = true)]
    pub visitor_email_limit_replenish: Option<String>,

    /// Max concurrent subscriptions per visitor
    #[arg(long = "visitor-subscription-limit", global = true)]
    pub visitor_subscription_limit: Option<i64>,

    /// SSE/JSON/WebSocket keepalive cadence, e.g. 45s
    #[arg(long = "keepalive-interval", global = true)]
    pub keepalive_interval: Option<String>,

    /// Manager loop cadence, e.g. 1m
    #[arg(long = "manager-interval", global = true)]
    pub manager_interval: Option<String>,

    /// Scheduled-delivery loop cadence, e.g. 10s
    #[arg(long = "at-sender-interval", global = true)]
    pub at_sender_interval: Option<String>,

    /// Push-hook keepalive cadence, e.g. 3h
    #[arg(long = "push-keepalive-interval", global = true)]
    pub push_keepalive_interval: Option<String>,

    /// Smallest allowed scheduled-delivery delay, e.g. 10s
    #[arg(long = "min-delay", global = true)]
    pub min_delay: Option<String>,

    /// Largest allowed scheduled-delivery delay, e.g. 3d
    #[arg(long = "max-delay", global = true)]
    pub max_delay: Option<String>,

    /// Max bytes of a request body treated as message text
    #[arg(long = "message-limit", global = true)]
    pub message_limit: Option<usize>,

    /// Global ceiling on live topic count
    #[arg(long = "total-topic-limit", global = true)]
    pub total_topic_limit: Option<usize>,

    /// Trust X-Forwarded-For for visitor identity
    #[arg(long = "behind-proxy", global = true, env = ENV_BEHIND_PROXY)]
    pub behind_proxy: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server (default when no subcommand is given)
    Serve,
}

/// Parse command line arguments
pub fn parse() -> Cli {
    Cli::parse()
}
