//! `/v1/chat/completions`: the only request path that runs the full
//! optimization pipeline. Streaming and buffered replies share the same
//! `Pipeline::prepare` steps; only the tail differs.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ctxproxy_core::ChatRequest;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error_response::ApiError;
use crate::state::AppState;

/// Relays raw upstream bytes through `axum::body::Body::from_stream` rather
/// than axum's `Sse` wrapper, so SSE framing reaches the client byte-for-byte
/// instead of being re-split and re-escaped into `Event`s.
pub async fn handle_chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Result<Response, ApiError> {
    let cancel = CancellationToken::new();

    if request.stream {
        let streamed = state.pipeline.stream(request, &cancel).await?;
        let status = StatusCode::from_u16(streamed.status).unwrap_or(StatusCode::OK);
        let upstream_headers = streamed.upstream.headers;
        let body = Body::from_stream(streamed.upstream.body.map(|chunk| chunk.map_err(std::io::Error::other)));

        let mut response = Response::builder()
            .status(status)
            .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
            .header(axum::http::header::CACHE_CONTROL, "no-cache")
            .body(body)
            .map_err(|e| ApiError(ctxproxy_core::ProxyError::Internal(e.to_string())))?;

        for name in ["x-request-id", "openai-organization"] {
            if let Some(value) = upstream_headers.get(name) {
                if let Ok(name) = HeaderName::try_from(name) {
                    response.headers_mut().insert(name, value.clone());
                }
            }
        }

        return Ok(response);
    }

    let response = state.pipeline.process(request, &cancel).await?;
    Ok((StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK), Json(response.body)).into_response())
}
