//! Liveness, readiness, Prometheus exposition, and traffic introspection.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy", "version": VERSION}))
}

pub async fn ready() -> impl IntoResponse {
    Json(json!({"status": "ready"}))
}

/// Hand-rolled Prometheus text exposition; small enough a metrics crate
/// would be overkill for the handful of gauges the traffic analyzer tracks.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.traffic.get_stats();
    let uptime_seconds = state.started_at.elapsed().as_secs_f64();

    let mut body = String::new();
    body.push_str("# HELP ctxproxy_uptime_seconds Seconds since process start.\n");
    body.push_str("# TYPE ctxproxy_uptime_seconds gauge\n");
    body.push_str(&format!("ctxproxy_uptime_seconds {uptime_seconds}\n"));

    body.push_str("# HELP ctxproxy_requests_total Requests recorded in the rolling traffic history.\n");
    body.push_str("# TYPE ctxproxy_requests_total counter\n");
    body.push_str(&format!("ctxproxy_requests_total {}\n", stats.total_requests));

    body.push_str("# HELP ctxproxy_tokens_saved_total Tokens saved by optimization across the rolling history.\n");
    body.push_str("# TYPE ctxproxy_tokens_saved_total counter\n");
    body.push_str(&format!("ctxproxy_tokens_saved_total {}\n", stats.total_tokens_saved));

    body.push_str("# HELP ctxproxy_optimization_rate_pct Share of recorded requests optimization altered.\n");
    body.push_str("# TYPE ctxproxy_optimization_rate_pct gauge\n");
    body.push_str(&format!("ctxproxy_optimization_rate_pct {}\n", stats.optimization_rate));

    for (breaker_name, breaker_state, _) in state.breakers.list() {
        let open = if breaker_state == ctxproxy_core::breaker::BreakerState::Open { 1 } else { 0 };
        body.push_str(&format!("ctxproxy_breaker_open{{name=\"{breaker_name}\"}} {open}\n"));
    }

    ([("content-type", "text/plain; version=0.0.4")], body)
}

pub async fn traffic_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.traffic.get_stats())
}

#[derive(Deserialize)]
pub struct RecentQuery {
    pub n: Option<usize>,
}

pub async fn traffic_recent(State(state): State<AppState>, Query(query): Query<RecentQuery>) -> impl IntoResponse {
    Json(state.traffic.recent(query.n.unwrap_or(20)))
}
