//! Attachment download endpoint

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path as UrlPath, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use tokio_util::io::ReaderStream;

use crate::domain::rate::Limiter;
use crate::utils::mime::content_type_for_filename;

use super::types::ApiError;
use super::ApiState;

/// GET /file/<id>[.ext]
///
/// The blob is stored under the bare message id; the extension only informs
/// the content type. The download counts against the visitor's bandwidth
/// budget up front, by file size.
pub async fn download(
    State(state): State<ApiState>,
    UrlPath(file): UrlPath<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let visitor = state.visitor(addr, &headers);
    visitor.keepalive();
    let file_cache = state
        .broker
        .file_cache()
        .ok_or_else(ApiError::not_found)?;

    let id = file.split('.').next().unwrap_or_default();
    let (path, size) = file_cache.entry(id).await?;

    if !visitor.bandwidth_limiter().allow(size as i64) {
        return Err(ApiError::rate_limit_bandwidth());
    }

    let file_handle = tokio::fs::File::open(&path).await.map_err(|e| {
        tracing::error!(id, error = %e, "Failed to open attachment");
        ApiError::internal_io()
    })?;

    Response::builder()
        .header(header::CONTENT_TYPE, content_type_for_filename(&file))
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(ReaderStream::new(file_handle)))
        .map_err(|_| ApiError::internal())
}
