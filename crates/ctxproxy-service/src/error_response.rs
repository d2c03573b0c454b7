//! Wraps `ProxyError` for axum, since neither the trait nor the error type
//! lives in this crate. Shapes the body as `{"error":{"message","type"}}`
//! per the taxonomy in §7, except `upstream_permanent`, which is relayed
//! verbatim.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ctxproxy_core::ProxyError;
use serde_json::json;

pub struct ApiError(pub ProxyError);

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            ProxyError::UpstreamPermanent { status, body } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
                (status, body).into_response()
            }
            ProxyError::BreakerOpen { name, retry_after_secs } => {
                let body = json!({"error": {"message": format!("circuit breaker '{name}' is open"), "type": "breaker_open_error"}});
                let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert("retry-after", value);
                }
                response
            }
            ProxyError::ClientValidation(ref message) | ProxyError::UnknownProvider(ref message) => {
                let kind = self.0.kind();
                let body = json!({"error": {"message": message, "type": kind}});
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            ProxyError::UpstreamTransient(ref message) => {
                let body = json!({"error": {"message": message, "type": "upstream_transient_error"}});
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
            ProxyError::Internal(ref message) => {
                let body = json!({"error": {"message": message, "type": "internal_error"}});
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
