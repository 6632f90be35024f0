//! Router assembly and server startup

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Json;
use axum::extract::{DefaultBodyLimit, Path as UrlPath, Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::ShutdownService;
use crate::core::constants::DISALLOWED_TOPICS;
use crate::domain::broker::{Broker, valid_topic_name};

use super::types::ApiError;
use super::{ApiState, files, publish, subscribe, ws};

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>beacon</title></head>
<body>
<h1>beacon</h1>
<p>Publish a message with <code>curl -d "hi" {{base}}/{{topic}}</code>,
subscribe with <code>curl -N {{base}}/{{topic}}/sse</code>.</p>
</body>
</html>
"#;

pub struct ApiServer {
    state: ApiState,
}

impl ApiServer {
    pub fn new(broker: Arc<Broker>, shutdown: ShutdownService) -> Self {
        Self {
            state: ApiState { broker, shutdown },
        }
    }

    pub async fn start(self) -> Result<()> {
        let config = self.state.broker.config().clone();
        if config.server.listen_https.is_some() || config.server.listen_unix.is_some() {
            tracing::warn!(
                "listen-https / listen-unix are recognized but not served by this core; \
                 terminate TLS in front of the HTTP listener"
            );
        }

        let shutdown = self.state.shutdown.clone();
        let app = router(self.state);
        let listener = TcpListener::bind(&config.server.listen_http).await?;
        tracing::info!(addr = %config.server.listen_http, "Listening for HTTP connections");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;
        Ok(())
    }
}

/// Build the full route table. Every response carries the permissive CORS
/// header; OPTIONS preflights are answered by the CORS layer.
pub fn router(state: ApiState) -> Router {
    let config = state.broker.config();
    let body_limit = config
        .attachments
        .file_size_limit
        .max(config.server.message_limit as u64) as usize
        + 4096;

    Router::new()
        .route("/", get(home))
        .route("/file/{file}", get(files::download))
        .route(
            "/{topic}",
            get(topic_page).put(publish::publish).post(publish::publish),
        )
        .route("/{topic}/json", get(subscribe::subscribe_json))
        .route("/{topic}/sse", get(subscribe::subscribe_sse))
        .route("/{topic}/raw", get(subscribe::subscribe_raw))
        .route("/{topic}/ws", get(ws::subscribe_ws))
        .route("/{topic}/publish", get(publish::publish_get))
        .route("/{topic}/send", get(publish::publish_get))
        .route("/{topic}/trigger", get(publish::publish_get))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn page(state: &ApiState, topic: &str) -> Html<String> {
    let base = state
        .broker
        .config()
        .base_url_trimmed()
        .unwrap_or("http://localhost:2586")
        .to_string();
    Html(
        PAGE_TEMPLATE
            .replace("{{base}}", &base)
            .replace("{{topic}}", if topic.is_empty() { "mytopic" } else { topic }),
    )
}

async fn home(State(state): State<ApiState>) -> Html<String> {
    page(&state, "")
}

/// GET /<topic>: the web page, or UnifiedPush discovery JSON with `up=1`
async fn topic_page(
    State(state): State<ApiState>,
    UrlPath(topic): UrlPath<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    if DISALLOWED_TOPICS.contains(&topic.as_str()) {
        return Err(ApiError::not_found());
    }
    if !valid_topic_name(&topic) {
        return Err(ApiError::invalid_topic());
    }
    if query.get("up").map(String::as_str) == Some("1") {
        return Ok(Json(serde_json::json!({"unifiedpush": {"version": 1}})).into_response());
    }
    Ok(page(&state, &topic).into_response())
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cli::Cli;
    use crate::core::config::AppConfig;
    use crate::data::cache::{MemoryCache, MessageCache};
    use crate::data::files::FileCache;
    use crate::domain::message::Message;
    use axum::body::{Body, to_bytes};
    use axum::extract::connect_info::ConnectInfo;
    use axum::http::{Request, StatusCode, header};
    use clap::Parser;
    use futures::StreamExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn state_with(adjust: impl FnOnce(&mut AppConfig)) -> ApiState {
        let mut config = AppConfig::load(&Cli::try_parse_from(["beacon"]).unwrap()).unwrap();
        adjust(&mut config);
        let cache: Arc<dyn MessageCache> = Arc::new(MemoryCache::new());
        let file_cache = match &config.attachments.cache_dir {
            Some(dir) => Some(Arc::new(
                FileCache::new(
                    dir,
                    config.attachments.total_size_limit,
                    config.attachments.file_size_limit,
                )
                .await
                .unwrap(),
            )),
            None => None,
        };
        let broker = Arc::new(Broker::new(config, cache, file_cache, None, None));
        ApiState {
            broker,
            shutdown: ShutdownService::new(),
        }
    }

    async fn plain_state() -> ApiState {
        state_with(|_| {}).await
    }

    fn request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("9.9.9.9:1234".parse().unwrap()));
        req
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_publish_and_poll_roundtrip() {
        let state = plain_state().await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("PUT", "/mytopic", "hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .map(|v| v.to_str().unwrap()),
            Some("*")
        );
        let body = json_body(response).await;
        assert_eq!(body["message"], "hello");
        assert_eq!(body["topic"], "mytopic");
        assert_eq!(body["event"], "message");

        let response = app
            .oneshot(request("GET", "/mytopic/json?poll=1&since=all", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#""message":"hello""#));
    }

    #[tokio::test]
    async fn test_publish_empty_body_uses_placeholder() {
        let state = plain_state().await;
        let app = router(state);
        let response = app
            .oneshot(request("GET", "/mytopic/trigger", Body::empty()))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["message"], "triggered");
    }

    #[tokio::test]
    async fn test_publish_priority_aliases_and_errors() {
        let state = plain_state().await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("PUT", "/t?priority=urgent", "x"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["priority"], 5);

        let response = app
            .oneshot(request("PUT", "/t?priority=bogus", "x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], 40007);
        assert_eq!(body["http"], 400);
    }

    #[tokio::test]
    async fn test_disallowed_and_invalid_topics() {
        let state = plain_state().await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("PUT", "/docs", "x"))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["code"], 40010);

        let response = app
            .oneshot(request("PUT", "/has%20space", "x"))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["code"], 40009);
    }

    #[tokio::test]
    async fn test_request_rate_limit() {
        let state = state_with(|c| c.visitor.request_limit_burst = 2).await;
        let app = router(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("PUT", "/t", "x"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.oneshot(request("PUT", "/t", "x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(response).await;
        assert_eq!(body["code"], 42901);
    }

    #[tokio::test]
    async fn test_sse_stream_open_then_live_message() {
        let state = plain_state().await;
        let broker = Arc::clone(&state.broker);
        let app = router(state);

        let response = app
            .oneshot(request("GET", "/mytopic/sse", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let mut frames = response.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let first = String::from_utf8(first.to_vec()).unwrap();
        assert!(first.starts_with("event: open\ndata: "));

        // Live publish reaches the registered subscriber
        let topic = broker.topic_if_exists("mytopic").expect("topic registered");
        let mut m = Message::new("mytopic");
        m.message = "live one".into();
        topic.publish(&Arc::new(m));

        let next = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let next = String::from_utf8(next.to_vec()).unwrap();
        assert!(next.starts_with("data: "));
        assert!(next.contains(r#""message":"live one""#));
    }

    #[tokio::test]
    async fn test_multi_topic_poll() {
        let state = plain_state().await;
        let app = router(state);

        app.clone()
            .oneshot(request("PUT", "/a", "x"))
            .await
            .unwrap();
        app.clone()
            .oneshot(request("PUT", "/b", "y"))
            .await
            .unwrap();

        let response = app
            .oneshot(request("GET", "/a,b/json?poll=1&since=all", Body::empty()))
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(text.contains(r#""topic":"a""#));
        assert!(text.contains(r#""topic":"b""#));
    }

    #[tokio::test]
    async fn test_scheduled_message_hidden_until_requested() {
        let state = plain_state().await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("PUT", "/t?delay=30m", "later"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Not in a normal poll
        let response = app
            .clone()
            .oneshot(request("GET", "/t/json?poll=1&since=all", Body::empty()))
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());

        // Visible with scheduled=1
        let response = app
            .oneshot(request(
                "GET",
                "/t/json?poll=1&since=all&scheduled=1",
                Body::empty(),
            ))
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8(bytes.to_vec())
            .unwrap()
            .contains(r#""message":"later""#));
    }

    #[tokio::test]
    async fn test_delay_validation() {
        let state = plain_state().await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("PUT", "/t?delay=1s", "x"))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["code"], 40005);

        let response = app
            .clone()
            .oneshot(request("PUT", "/t?delay=30d", "x"))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["code"], 40006);

        let mut req = request("PUT", "/t?delay=30m", "x");
        req.headers_mut()
            .insert("X-Cache", "no".parse().unwrap());
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(json_body(response).await["code"], 40002);
    }

    #[tokio::test]
    async fn test_attachment_upload_and_download() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(|c| {
            c.attachments.cache_dir = Some(dir.path().to_path_buf());
            c.server.base_url = Some("http://localhost:2586".into());
        })
        .await;
        let app = router(state);

        // 5 KB of non-UTF-8 bytes, no filename: stored as attachment
        let payload = vec![0xF7u8; 5 * 1024];
        let response = app
            .clone()
            .oneshot(request("PUT", "/t", payload.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let url = body["attachment"]["url"].as_str().unwrap();
        assert!(url.starts_with("http://localhost:2586/file/"));
        assert_eq!(body["attachment"]["size"], 5 * 1024);

        let path = url.strip_prefix("http://localhost:2586").unwrap();
        let response = app.oneshot(request("GET", path, Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.to_vec(), payload);
    }

    #[tokio::test]
    async fn test_attachment_without_base_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(|c| {
            c.attachments.cache_dir = Some(dir.path().to_path_buf());
        })
        .await;
        let app = router(state);

        let response = app
            .oneshot(request("PUT", "/t", vec![0xF7u8; 64]))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["code"], 40014);
    }

    #[tokio::test]
    async fn test_attachment_quota() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(|c| {
            c.attachments.cache_dir = Some(dir.path().to_path_buf());
            c.server.base_url = Some("http://localhost:2586".into());
            c.visitor.attachment_total_size_limit = 2048;
        })
        .await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("PUT", "/t", vec![0xF7u8; 5 * 1024]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = json_body(response).await;
        assert_eq!(body["code"], 40012);

        // The partial file must be gone
        let leftover: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_file_and_route_are_404() {
        let state = plain_state().await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("GET", "/file/nope.bin", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], 40401);

        let response = app
            .oneshot(request("GET", "/t/nosuchformat", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unified_push_discovery() {
        let state = plain_state().await;
        let app = router(state);
        let response = app
            .oneshot(request("GET", "/mytopic?up=1", Body::empty()))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["unifiedpush"]["version"], 1);
    }

    #[tokio::test]
    async fn test_message_param_on_get_publish() {
        let state = plain_state().await;
        let app = router(state);
        let response = app
            .oneshot(request(
                "GET",
                "/t/publish?message=from%20query&title=hey",
                Body::empty(),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["message"], "from query");
        assert_eq!(body["title"], "hey");
    }
}
