pub mod chat;
pub mod health;
pub mod management;

use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(chat::handle_chat))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .route("/traffic/stats", get(health::traffic_stats))
        .route("/traffic/recent", get(health::traffic_recent))
        .route("/config/providers", get(management::list_providers).post(management::add_provider))
        .route("/config/providers/templates", get(management::list_templates_handler))
        .route("/config/providers/from-template", post(management::from_template))
        .route(
            "/config/providers/:id",
            patch(management::patch_provider).delete(management::delete_provider),
        )
        .route("/config/providers/:id/default", post(management::set_default_provider))
        .route("/config/circuit-breakers", get(management::list_breakers))
        .route("/config/circuit-breakers/reset-all", post(management::reset_all_breakers))
        .route("/config/circuit-breakers/:name", get(management::get_breaker))
        .route("/config/circuit-breakers/:name/reset", post(management::reset_breaker))
        .route("/memory", post(management::add_memory).delete(management::clear_memory))
        .route("/memory/search", get(management::search_memory))
        .route("/memory/:id", delete(management::delete_memory))
}
