//! Per-visitor state: limiters and liveness
//!
//! A visitor is identified by client IP (or the X-Forwarded-For value when
//! running behind a proxy). The limiter set can be swapped atomically behind
//! the RwLock, so concurrent readers always see a consistent snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::core::config::VisitorConfig;
use crate::core::constants::{VISITOR_BANDWIDTH_WINDOW_SECS, VISITOR_STALE_MIN_SECS};

use super::rate::{BytesLimiter, FixedLimiter, Limiter, TokenBucket};

/// The replaceable limiter bundle
pub struct VisitorLimits {
    pub requests: Arc<TokenBucket>,
    pub emails: Arc<TokenBucket>,
    pub subscriptions: Arc<FixedLimiter>,
    pub bandwidth: Arc<BytesLimiter>,
}

impl VisitorLimits {
    pub fn from_config(config: &VisitorConfig) -> Self {
        Self {
            requests: Arc::new(TokenBucket::new(
                config.request_limit_replenish,
                config.request_limit_burst,
            )),
            emails: Arc::new(TokenBucket::new(
                config.email_limit_replenish,
                config.email_limit_burst,
            )),
            subscriptions: Arc::new(FixedLimiter::new(config.subscription_limit)),
            bandwidth: Arc::new(BytesLimiter::new(
                config.attachment_daily_bandwidth_limit,
                Duration::from_secs(VISITOR_BANDWIDTH_WINDOW_SECS),
            )),
        }
    }
}

pub struct Visitor {
    ip: String,
    limits: RwLock<VisitorLimits>,
    last_seen: Mutex<Instant>,
    stale_after: Duration,
}

impl Visitor {
    pub fn new(ip: &str, config: &VisitorConfig) -> Self {
        let limits = VisitorLimits::from_config(config);
        // A visitor is kept at least as long as a drained request bucket
        // takes to fill back up, so its budget cannot reset by expiry.
        let stale_after = limits
            .requests
            .refill_interval()
            .max(Duration::from_secs(VISITOR_STALE_MIN_SECS));
        Self {
            ip: ip.to_string(),
            limits: RwLock::new(limits),
            last_seen: Mutex::new(Instant::now()),
            stale_after,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Consume one request token
    pub fn request_allowed(&self) -> bool {
        self.limits.read().requests.allow(1)
    }

    /// Consume one outbound e-mail token
    pub fn email_allowed(&self) -> bool {
        self.limits.read().emails.allow(1)
    }

    /// Claim one subscription slot
    pub fn subscription_allowed(&self) -> bool {
        self.limits.read().subscriptions.allow(1)
    }

    /// Release a subscription slot (connection closed)
    pub fn remove_subscription(&self) {
        self.limits.read().subscriptions.allow(-1);
    }

    pub fn active_subscriptions(&self) -> i64 {
        self.limits.read().subscriptions.value()
    }

    /// Current bandwidth limiter; callers holding the Arc keep consuming
    /// from the old budget if the set is swapped mid-stream.
    pub fn bandwidth_limiter(&self) -> Arc<BytesLimiter> {
        Arc::clone(&self.limits.read().bandwidth)
    }

    /// Swap the whole limiter set (e.g. on a tier change)
    pub fn replace_limits(&self, limits: VisitorLimits) {
        *self.limits.write() = limits;
    }

    /// Refresh the liveness timestamp
    pub fn keepalive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Whether the manager loop may expire this visitor
    pub fn stale(&self) -> bool {
        self.last_seen.lock().elapsed() > self.stale_after && self.active_subscriptions() == 0
    }
}
