//! Subscribe pipeline: JSON, SSE, and raw streamers plus short polls
//!
//! A subscribe resolves the comma-separated topic list, optionally replays
//! cached messages matching `since`, registers a callback on each topic, and
//! streams frames until the client disconnects or the broker shuts down.
//! The connection emits `open`, then the replay batch, then live messages.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path as UrlPath, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use tokio::sync::mpsc;

use crate::data::cache::Since;
use crate::domain::message::{EventKind, Message, parse_priority};
use crate::domain::topic::Topic;
use crate::domain::visitor::Visitor;
use crate::utils::time::parse_since;

use super::params::Params;
use super::types::ApiError;
use super::ApiState;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFormat {
    Json,
    Sse,
    Raw,
}

impl SubscribeFormat {
    fn content_type(&self) -> &'static str {
        match self {
            SubscribeFormat::Json => "application/x-ndjson",
            SubscribeFormat::Sse => "text/event-stream",
            SubscribeFormat::Raw => "text/plain",
        }
    }

    /// One wire frame per message; None if the message cannot be serialized
    pub fn encode(&self, message: &Message) -> Option<String> {
        match self {
            SubscribeFormat::Json => match serde_json::to_string(message) {
                Ok(json) => Some(format!("{json}\n")),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    None
                }
            },
            SubscribeFormat::Sse => {
                let json = match serde_json::to_string(message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize message");
                        return None;
                    }
                };
                match message.event {
                    EventKind::Message => Some(format!("data: {json}\n\n")),
                    event => Some(format!("event: {}\ndata: {json}\n\n", event.as_str())),
                }
            }
            SubscribeFormat::Raw => match message.event {
                EventKind::Message => {
                    Some(format!("{}\n", message.message.replace('\n', " ")))
                }
                _ => Some("\n".to_string()),
            },
        }
    }
}

/// Query filters; they apply to `message` events only
#[derive(Default, Debug)]
pub struct MessageFilter {
    message: Option<String>,
    title: Option<String>,
    priority: Vec<i8>,
    tags: Vec<String>,
}

impl MessageFilter {
    pub fn from_params(params: &Params) -> Result<Self, ApiError> {
        let mut priority = Vec::new();
        for value in params.get_list("priority") {
            priority.push(parse_priority(&value).ok_or_else(ApiError::invalid_priority)?);
        }
        Ok(Self {
            message: params.get("message"),
            title: params.get("title"),
            priority,
            tags: params.get_list("tags"),
        })
    }

    pub fn matches(&self, message: &Message) -> bool {
        if message.event != EventKind::Message {
            return true;
        }
        if let Some(wanted) = &self.message {
            if &message.message != wanted {
                return false;
            }
        }
        if let Some(wanted) = &self.title {
            if &message.title != wanted {
                return false;
            }
        }
        if !self.priority.is_empty() && !self.priority.contains(&message.effective_priority()) {
            return false;
        }
        self.tags.iter().all(|tag| message.tags.contains(tag))
    }
}

/// Parsed subscribe options
#[derive(Debug)]
pub(super) struct SubscribeArgs {
    pub poll: bool,
    pub scheduled: bool,
    pub since: Since,
    pub filter: MessageFilter,
}

pub(super) fn parse_args(params: &Params) -> Result<SubscribeArgs, ApiError> {
    let poll = params.get_bool("poll");
    // Streams default to no backfill; polls default to the whole cache
    let since = match params.get("since") {
        Some(value) => parse_since(&value).ok_or_else(ApiError::invalid_since)?,
        None if poll => Since::All,
        None => Since::None,
    };
    Ok(SubscribeArgs {
        poll,
        scheduled: params.get_bool("scheduled"),
        since,
        filter: MessageFilter::from_params(params)?,
    })
}

/// Releases the visitor's subscription slot and all topic registrations when
/// the connection (or a failed setup) goes away
pub(super) struct SubscriptionGuard {
    visitor: Arc<Visitor>,
    subs: Vec<(Arc<Topic>, u64)>,
}

impl SubscriptionGuard {
    /// Claim one subscription slot for the visitor
    pub fn claim(visitor: Arc<Visitor>) -> Result<Self, ApiError> {
        if !visitor.subscription_allowed() {
            return Err(ApiError::rate_limit_subscriptions());
        }
        Ok(Self {
            visitor,
            subs: Vec::new(),
        })
    }

    /// Register a delivery channel on every topic
    pub fn register(&mut self, topics: &[Arc<Topic>]) -> mpsc::UnboundedReceiver<Arc<Message>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for topic in topics {
            let tx = tx.clone();
            let id = topic.subscribe(Arc::new(move |msg| {
                tx.send(msg)
                    .map_err(|_| crate::domain::topic::TopicError::SubscriberGone)
            }));
            self.subs.push((Arc::clone(topic), id));
        }
        rx
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for (topic, id) in &self.subs {
            topic.unsubscribe(*id);
        }
        self.visitor.remove_subscription();
    }
}

/// Cached messages for all requested topics, merged into time order
pub(super) async fn replay(
    state: &ApiState,
    topic_names: &[String],
    since: Since,
    scheduled: bool,
) -> Result<Vec<Message>, ApiError> {
    let mut messages = Vec::new();
    for name in topic_names {
        messages.extend(state.broker.cache().messages(name, since, scheduled).await?);
    }
    messages.sort_by_key(|m| m.time);
    Ok(messages)
}

pub(super) fn resolve_topics(
    state: &ApiState,
    topics_str: &str,
) -> Result<(Vec<String>, Vec<Arc<Topic>>), ApiError> {
    let names: Vec<String> = topics_str.split(',').map(str::to_string).collect();
    let mut topics = Vec::with_capacity(names.len());
    for name in &names {
        topics.push(state.broker.topic(name)?);
    }
    Ok((names, topics))
}

pub async fn subscribe_json(
    State(state): State<ApiState>,
    UrlPath(topics): UrlPath<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    subscribe(state, topics, addr, headers, query, SubscribeFormat::Json).await
}

pub async fn subscribe_sse(
    State(state): State<ApiState>,
    UrlPath(topics): UrlPath<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    subscribe(state, topics, addr, headers, query, SubscribeFormat::Sse).await
}

pub async fn subscribe_raw(
    State(state): State<ApiState>,
    UrlPath(topics): UrlPath<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    subscribe(state, topics, addr, headers, query, SubscribeFormat::Raw).await
}

async fn subscribe(
    state: ApiState,
    topics_str: String,
    addr: SocketAddr,
    headers: HeaderMap,
    query: HashMap<String, String>,
    format: SubscribeFormat,
) -> Result<Response, ApiError> {
    let visitor = state.visitor(addr, &headers);
    visitor.keepalive();
    let params = Params::new(&headers, &query);
    let args = parse_args(&params)?;
    let (names, topics) = resolve_topics(&state, &topics_str)?;

    let mut guard = SubscriptionGuard::claim(Arc::clone(&visitor))?;

    if args.poll {
        // One-shot: replay matching messages, then close. The guard drops
        // right here and releases the slot.
        let replayed = replay(&state, &names, args.since, args.scheduled).await?;
        let mut body = String::new();
        for message in replayed.iter().filter(|m| args.filter.matches(m)) {
            if let Some(frame) = format.encode(message) {
                body.push_str(&frame);
            }
        }
        return Response::builder()
            .header(header::CONTENT_TYPE, format.content_type())
            .body(Body::from(body))
            .map_err(|_| ApiError::internal());
    }

    // Register before replay so nothing published in between is lost; a
    // message landing during the replay read may be seen twice, which the
    // ordering contract allows.
    let mut rx = guard.register(&topics);
    let replayed = replay(&state, &names, args.since, args.scheduled).await?;

    let keepalive = state.broker.config().server.keepalive_interval;
    let mut shutdown_rx = state.shutdown.subscribe();
    let filter = args.filter;
    let label = topics_str;

    let stream = async_stream::stream! {
        let _guard = guard;
        if let Some(frame) = format.encode(&Message::open(&label)) {
            yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(frame));
        }
        for message in replayed.iter().filter(|m| filter.matches(m)) {
            if let Some(frame) = format.encode(message) {
                yield Ok(Bytes::from(frame));
            }
        }
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + keepalive,
            keepalive,
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                maybe = rx.recv() => match maybe {
                    Some(message) => {
                        if filter.matches(&message) {
                            if let Some(frame) = format.encode(&message) {
                                yield Ok(Bytes::from(frame));
                            }
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    visitor.keepalive();
                    if let Some(frame) = format.encode(&Message::keepalive(&label)) {
                        yield Ok(Bytes::from(frame));
                    }
                }
            }
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, format.content_type())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|_| ApiError::internal())
}
