//! Publish pipeline
//!
//! A publish is parsed into a Message, fanned out to live subscribers,
//! cached, and optionally handed to the push/mail collaborators. The body is
//! peeked up to the message limit without consuming the remainder, so large
//! or binary bodies can still stream into the attachment cache.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path as UrlPath, Query, State};
use axum::http::HeaderMap;
use chrono::Utc;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::core::constants::MIME_SNIFF_LEN;
use crate::domain::message::{Attachment, Message, parse_priority};
use crate::domain::rate::{FixedLimiter, Limiter};
use crate::domain::visitor::Visitor;
use crate::utils::mime::{content_type_for_filename, extension_for, sniff_content_type};
use crate::utils::time::parse_delay;

use super::params::Params;
use super::types::ApiError;
use super::ApiState;

/// PUT/POST /<topic>
pub async fn publish(
    State(state): State<ApiState>,
    UrlPath(topic): UrlPath<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Message>, ApiError> {
    handle_publish(state, topic, addr, headers, query, body).await
}

/// GET /<topic>/{publish,send,trigger}
pub async fn publish_get(
    State(state): State<ApiState>,
    UrlPath(topic): UrlPath<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Message>, ApiError> {
    handle_publish(state, topic, addr, headers, query, Body::empty()).await
}

async fn handle_publish(
    state: ApiState,
    topic_name: String,
    addr: SocketAddr,
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: Body,
) -> Result<Json<Message>, ApiError> {
    let visitor = state.visitor(addr, &headers);
    visitor.keepalive();
    if !visitor.request_allowed() {
        return Err(ApiError::rate_limit_requests());
    }
    let topic = state.broker.topic(&topic_name)?;
    let params = Params::new(&headers, &query);
    let config = state.broker.config().clone();

    let mut message = Message::new(&topic_name);
    message.sender = visitor.ip().to_string();
    if let Some(title) = params.get("title") {
        message.title = title;
    }
    message.tags = params.get_list("tags");
    if let Some(priority) = params.get("priority") {
        message.priority = parse_priority(&priority).ok_or_else(ApiError::invalid_priority)?;
    }
    if let Some(click) = params.get("click") {
        message.click = click;
    }
    if let Some(poll_id) = params.get("poll-id") {
        message.poll_id = poll_id;
    }

    let cache_disabled = params.is_disabled("cache");
    let push_disabled = params.is_disabled("firebase");
    let email = params.get("email");

    if let Some(delay) = params.get("delay") {
        if cache_disabled || !state.cache_enabled() {
            return Err(ApiError::delay_no_cache());
        }
        message.time = parse_delay(&delay, config.min_delay, config.max_delay)?;
    }
    if email.is_some() {
        if state.broker.mailer().is_none() {
            return Err(ApiError::email_disabled());
        }
        if !visitor.email_allowed() {
            return Err(ApiError::rate_limit_emails());
        }
    }

    let peeked = peek_body(body, config.server.message_limit).await?;

    let attach_url = params.get("attach");
    let filename = params.get("filename");
    let message_param = params.get("message");

    if let Some(url) = attach_url {
        // Rule 1: an external attach URL means the body is the message text
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ApiError::invalid_attach_url());
        }
        let name = filename.clone().unwrap_or_else(|| {
            url.rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("attachment")
                .to_string()
        });
        message.attachment = Some(Attachment {
            name,
            url,
            ..Default::default()
        });
        message.message = peeked_text(&peeked)?;
        if message.message.is_empty() {
            message.message = message_param.unwrap_or_default();
        }
    } else {
        let body_is_attachment = if filename.is_some() {
            true
        } else if message_param.is_some() {
            !peeked.is_empty()
        } else {
            peeked.limit_reached || std::str::from_utf8(&peeked.data).is_err()
        };

        if body_is_attachment {
            write_attachment(&state, &visitor, &mut message, filename, peeked).await?;
            message.message = message_param.unwrap_or_default();
        } else {
            message.message = match message_param {
                Some(text) => text,
                None => peeked_text(&peeked)?,
            };
        }
    }

    message.message = message.message.trim().to_string();
    if message.message.is_empty() {
        message.message = match &message.attachment {
            Some(a) if !a.name.is_empty() => format!("You received a file: {}", a.name),
            _ => "triggered".to_string(),
        };
    }

    let message = Arc::new(message);
    if message.is_scheduled() {
        // Held back until due; no fan-out, no push, no e-mail
        state.broker.cache().add_message(&message).await?;
    } else {
        topic.publish(&message);
        if !cache_disabled && state.cache_enabled() {
            state.broker.cache().add_message(&message).await?;
        }
        if let Some(pusher) = state.broker.pusher() {
            if !push_disabled {
                let pusher = Arc::clone(pusher);
                let m = Arc::clone(&message);
                tokio::spawn(async move {
                    let outgoing = if m.poll_id.is_empty() {
                        (*m).clone()
                    } else {
                        Message::poll_request(&m.topic, &m.poll_id)
                    };
                    if let Err(e) = pusher.push(&outgoing).await {
                        tracing::warn!(id = %m.id, error = %e, "Push delivery failed");
                    }
                });
            }
        }
        if let Some(to) = email {
            if let Some(mailer) = state.broker.mailer() {
                let mailer = Arc::clone(mailer);
                let m = Arc::clone(&message);
                tokio::spawn(async move {
                    if let Err(e) = mailer.send(&m.sender, &to, &m).await {
                        tracing::warn!(id = %m.id, error = %e, "E-mail delivery failed");
                    }
                });
            }
        }
    }

    state.broker.inc_published();
    tracing::debug!(id = %message.id, topic = %topic_name, "Message published");
    Ok(Json((*message).clone()))
}

/// Body text when it fit within the message limit and is valid UTF-8
fn peeked_text(peeked: &PeekedBody) -> Result<String, ApiError> {
    if peeked.limit_reached {
        return Err(ApiError::message_not_utf8());
    }
    std::str::from_utf8(&peeked.data)
        .map(|s| s.trim().to_string())
        .map_err(|_| ApiError::message_not_utf8())
}

/// Stream the body into the attachment cache and hang the reference off the
/// message. All policy checks happen before the first byte is written.
async fn write_attachment(
    state: &ApiState,
    visitor: &Arc<Visitor>,
    message: &mut Message,
    filename: Option<String>,
    peeked: PeekedBody,
) -> Result<(), ApiError> {
    let config = state.broker.config();
    let file_cache = state
        .broker
        .file_cache()
        .ok_or_else(ApiError::attachments_disallowed)?;
    let base_url = config
        .base_url_trimmed()
        .ok_or_else(ApiError::attachments_disallowed)?
        .to_string();

    let expires = Utc::now().timestamp() + config.attachments.expiry_duration.as_secs() as i64;
    if message.time > expires {
        return Err(ApiError::attachment_expires_before_delivery());
    }

    let used = state.broker.cache().attachments_size(visitor.ip()).await?;
    let quota = config
        .visitor
        .attachment_total_size_limit
        .saturating_sub(used);
    if quota == 0 {
        return Err(ApiError::attachment_too_large());
    }

    let sniffed = sniff_content_type(&peeked.data[..peeked.data.len().min(MIME_SNIFF_LEN)]);
    let (name, content_type, ext) = match filename {
        Some(name) => {
            let has_ext = Path::new(&name).extension().is_some();
            let content_type = if has_ext {
                content_type_for_filename(&name)
            } else {
                sniffed.to_string()
            };
            let ext = Path::new(&name)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_else(|| extension_for(sniffed).to_string());
            (name, content_type, ext)
        }
        None => {
            let ext = extension_for(sniffed).to_string();
            (format!("attachment{ext}"), sniffed.to_string(), ext)
        }
    };

    let limiters: Vec<Arc<dyn Limiter>> = vec![
        visitor.bandwidth_limiter(),
        Arc::new(FixedLimiter::new(quota as i64)),
    ];
    let written = file_cache
        .write(&message.id, peeked.into_reader(), &limiters)
        .await?;

    message.attachment = Some(Attachment {
        name,
        content_type,
        size: written as i64,
        expires,
        url: format!("{base_url}/file/{}{ext}", message.id),
        owner: visitor.ip().to_string(),
    });
    Ok(())
}

/// Request body peeked up to the message limit, remainder still streamable
struct PeekedBody {
    data: Vec<u8>,
    /// More bytes than the limit arrived; the body cannot be message text
    limit_reached: bool,
    rest: axum::body::BodyDataStream,
}

impl PeekedBody {
    fn is_empty(&self) -> bool {
        self.data.is_empty() && !self.limit_reached
    }

    /// Reader over the peeked bytes followed by the unread remainder
    fn into_reader(self) -> impl AsyncRead + Unpin {
        let PeekedBody { data, rest, .. } = self;
        let prefix =
            futures::stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(data)) });
        let rest = rest.map(|chunk| chunk.map_err(std::io::Error::other));
        StreamReader::new(Box::pin(prefix.chain(rest)))
    }
}

async fn peek_body(body: Body, limit: usize) -> Result<PeekedBody, ApiError> {
    let mut stream = body.into_data_stream();
    let mut data = Vec::new();
    while data.len() <= limit {
        match stream.next().await {
            Some(Ok(chunk)) => data.extend_from_slice(&chunk),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Body read failed");
                return Err(ApiError::internal_io());
            }
            None => break,
        }
    }
    let limit_reached = data.len() > limit;
    Ok(PeekedBody {
        data,
        limit_reached,
        rest: stream,
    })
}
