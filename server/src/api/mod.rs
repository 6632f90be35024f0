//! HTTP surface: routing, publish pipeline, subscribe streamers

pub mod files;
pub mod params;
pub mod publish;
pub mod server;
pub mod subscribe;
pub mod types;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderMap;

use crate::core::ShutdownService;
use crate::domain::broker::Broker;
use crate::domain::visitor::Visitor;

pub use server::ApiServer;
pub use types::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub broker: Arc<Broker>,
    pub shutdown: ShutdownService,
}

impl ApiState {
    /// Resolve the visitor for a request, honoring behind-proxy identity
    pub fn visitor(&self, addr: SocketAddr, headers: &HeaderMap) -> Arc<Visitor> {
        let ip = visitor_ip(addr, headers, self.broker.config().server.behind_proxy);
        self.broker.visitor(&ip)
    }

    /// Whether the configured cache backend actually stores messages
    pub fn cache_enabled(&self) -> bool {
        !self.broker.config().cache.duration.is_zero()
    }
}

/// Visitor identity: the client IP, or the first X-Forwarded-For entry when
/// the broker is configured as running behind a proxy
pub fn visitor_ip(addr: SocketAddr, headers: &HeaderMap, behind_proxy: bool) -> String {
    if behind_proxy {
        if let Some(forwarded) = headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return forwarded.to_string();
        }
    }
    addr.ip().to_string()
}
