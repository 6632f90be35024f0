//! Shared API types: the error registry and its JSON shape
//!
//! Every handler failure is a typed `ApiError` carrying a stable numeric
//! code and the HTTP status; the body is
//! `{"code": <int>, "http": <status>, "error": <string>, "link": <url?>}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::data::cache::CacheError;
use crate::data::files::FileCacheError;
use crate::domain::broker::BrokerError;
use crate::utils::time::DelayError;

/// Documentation base for error links
const DOCS_URL: &str = "https://beacon.sh/docs";

#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: u32,
    pub http: StatusCode,
    pub message: &'static str,
    pub link: Option<&'static str>,
}

impl ApiError {
    const fn new(code: u32, http: StatusCode, message: &'static str) -> Self {
        Self {
            code,
            http,
            message,
            link: None,
        }
    }

    const fn with_link(code: u32, http: StatusCode, message: &'static str, link: &'static str) -> Self {
        Self {
            code,
            http,
            message,
            link: Some(link),
        }
    }

    pub fn email_disabled() -> Self {
        Self::new(40001, StatusCode::BAD_REQUEST, "e-mail notifications are not enabled")
    }

    pub fn delay_no_cache() -> Self {
        Self::new(
            40002,
            StatusCode::BAD_REQUEST,
            "cannot disable cache for delayed message",
        )
    }

    pub fn invalid_delay() -> Self {
        Self::new(40004, StatusCode::BAD_REQUEST, "invalid delay parameter")
    }

    pub fn delay_too_small() -> Self {
        Self::new(40005, StatusCode::BAD_REQUEST, "delay is too small")
    }

    pub fn delay_too_large() -> Self {
        Self::new(40006, StatusCode::BAD_REQUEST, "delay is too large")
    }

    pub fn invalid_priority() -> Self {
        Self::new(40007, StatusCode::BAD_REQUEST, "invalid priority parameter")
    }

    pub fn invalid_since() -> Self {
        Self::with_link(
            40008,
            StatusCode::BAD_REQUEST,
            "invalid since parameter",
            DOCS_URL,
        )
    }

    pub fn invalid_topic() -> Self {
        Self::new(40009, StatusCode::BAD_REQUEST, "invalid topic name")
    }

    pub fn disallowed_topic() -> Self {
        Self::new(40010, StatusCode::BAD_REQUEST, "topic name is disallowed")
    }

    pub fn message_not_utf8() -> Self {
        Self::new(40011, StatusCode::BAD_REQUEST, "message must be valid UTF-8")
    }

    pub fn attachment_too_large() -> Self {
        Self::new(
            40012,
            StatusCode::PAYLOAD_TOO_LARGE,
            "attachment too large, or visitor quota reached",
        )
    }

    pub fn invalid_attach_url() -> Self {
        Self::new(40013, StatusCode::BAD_REQUEST, "invalid attach URL")
    }

    pub fn attachments_disallowed() -> Self {
        Self::new(
            40014,
            StatusCode::BAD_REQUEST,
            "attachments are not enabled on this server",
        )
    }

    pub fn attachment_expires_before_delivery() -> Self {
        Self::new(
            40015,
            StatusCode::BAD_REQUEST,
            "attachment would expire before the scheduled delivery time",
        )
    }

    pub fn not_found() -> Self {
        Self::new(40401, StatusCode::NOT_FOUND, "page not found")
    }

    pub fn rate_limit_requests() -> Self {
        Self::with_link(
            42901,
            StatusCode::TOO_MANY_REQUESTS,
            "request limit reached",
            DOCS_URL,
        )
    }

    pub fn rate_limit_emails() -> Self {
        Self::new(42902, StatusCode::TOO_MANY_REQUESTS, "e-mail limit reached")
    }

    pub fn rate_limit_subscriptions() -> Self {
        Self::with_link(
            42903,
            StatusCode::TOO_MANY_REQUESTS,
            "subscription limit reached",
            DOCS_URL,
        )
    }

    pub fn rate_limit_bandwidth() -> Self {
        Self::new(
            42904,
            StatusCode::TOO_MANY_REQUESTS,
            "attachment bandwidth limit reached",
        )
    }

    pub fn rate_limit_topics() -> Self {
        Self::new(42905, StatusCode::TOO_MANY_REQUESTS, "topic limit reached")
    }

    pub fn internal() -> Self {
        Self::new(50001, StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    pub fn internal_io() -> Self {
        Self::new(
            50002,
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error: I/O failure",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "code": self.code,
            "http": self.http.as_u16(),
            "error": self.message,
        });
        if let Some(link) = self.link {
            body["link"] = serde_json::Value::String(link.to_string());
        }
        (self.http, Json(body)).into_response()
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::InvalidTopicName(_) => Self::invalid_topic(),
            BrokerError::DisallowedTopicName(_) => Self::disallowed_topic(),
            BrokerError::TooManyTopics => Self::rate_limit_topics(),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        tracing::error!(error = %e, "Message cache failure");
        Self::internal()
    }
}

impl From<FileCacheError> for ApiError {
    fn from(e: FileCacheError) -> Self {
        match e {
            FileCacheError::LimitReached
            | FileCacheError::TooLarge
            | FileCacheError::CacheFull => Self::attachment_too_large(),
            FileCacheError::NotFound(_) | FileCacheError::InvalidId(_) => Self::not_found(),
            FileCacheError::Io(e) => {
                tracing::error!(error = %e, "Attachment I/O failure");
                Self::internal_io()
            }
        }
    }
}

impl From<DelayError> for ApiError {
    fn from(e: DelayError) -> Self {
        match e {
            DelayError::Invalid => Self::invalid_delay(),
            DelayError::TooSmall => Self::delay_too_small(),
            DelayError::TooLarge => Self::delay_too_large(),
        }
    }
}
