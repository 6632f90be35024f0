//! WebSocket subscriber endpoint
//!
//! After the upgrade, one loop multiplexes outgoing JSON frames and PINGs
//! against incoming frames. Clients are expected to answer PINGs; a missing
//! PONG past the grace period ends the connection. Incoming payloads are
//! discarded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path as UrlPath, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::core::constants::WS_PONG_GRACE_SECS;
use crate::domain::message::Message;
use crate::domain::visitor::Visitor;

use super::params::Params;
use super::subscribe::{MessageFilter, SubscriptionGuard, parse_args, replay, resolve_topics};
use super::types::ApiError;
use super::ApiState;

/// Max size of client frames; we only ever expect PONGs
const WS_MAX_MESSAGE_SIZE: usize = 64;
/// Deadline for a single outgoing frame
const WS_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

struct WsContext {
    guard: SubscriptionGuard,
    rx: mpsc::UnboundedReceiver<Arc<Message>>,
    replayed: Vec<Message>,
    visitor: Arc<Visitor>,
    filter: MessageFilter,
    keepalive: Duration,
    shutdown_rx: watch::Receiver<bool>,
    label: String,
}

/// GET /<topics>/ws
pub async fn subscribe_ws(
    State(state): State<ApiState>,
    UrlPath(topics): UrlPath<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let visitor = state.visitor(addr, &headers);
    visitor.keepalive();
    let params = Params::new(&headers, &query);
    let args = parse_args(&params)?;
    let (names, topic_handles) = resolve_topics(&state, &topics)?;

    let mut guard = SubscriptionGuard::claim(Arc::clone(&visitor))?;
    let rx = guard.register(&topic_handles);
    let replayed = replay(&state, &names, args.since, args.scheduled).await?;

    let ctx = WsContext {
        guard,
        rx,
        replayed,
        visitor,
        filter: args.filter,
        keepalive: state.broker.config().server.keepalive_interval,
        shutdown_rx: state.shutdown.subscribe(),
        label: topics,
    };

    Ok(ws
        .max_message_size(WS_MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| run_socket(socket, ctx)))
}

async fn run_socket(socket: WebSocket, ctx: WsContext) {
    let WsContext {
        guard,
        mut rx,
        replayed,
        visitor,
        filter,
        keepalive,
        mut shutdown_rx,
        label,
    } = ctx;
    let _guard = guard;
    let (mut sender, mut receiver) = socket.split();

    if send_message(&mut sender, &Message::open(&label)).await.is_err() {
        return;
    }
    for message in replayed.iter().filter(|m| filter.matches(m)) {
        if send_message(&mut sender, message).await.is_err() {
            return;
        }
    }

    let pong_deadline = keepalive + Duration::from_secs(WS_PONG_GRACE_SECS);
    let mut last_contact = Instant::now();
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
            }
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Pong(_))) => last_contact = Instant::now(),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {} // payloads are discarded
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket read failed");
                    break;
                }
            },
            maybe = rx.recv() => match maybe {
                Some(message) => {
                    if filter.matches(&message)
                        && send_message(&mut sender, &message).await.is_err()
                    {
                        break;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if last_contact.elapsed() > pong_deadline {
                    tracing::debug!("WebSocket client missed its PONG deadline");
                    break;
                }
                visitor.keepalive();
                let ping = tokio::time::timeout(
                    WS_WRITE_TIMEOUT,
                    sender.send(WsMessage::Ping(Bytes::new())),
                );
                match ping.await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
}

/// Send one message as a JSON text frame under the write deadline
async fn send_message(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    message: &Message,
) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize message");
            return Ok(()); // skip the frame, keep the connection
        }
    };
    match tokio::time::timeout(WS_WRITE_TIMEOUT, sender.send(WsMessage::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "WebSocket write failed");
            Err(())
        }
        Err(_) => {
            tracing::debug!("WebSocket write deadline elapsed");
            Err(())
        }
    }
}
