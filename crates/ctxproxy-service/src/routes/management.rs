//! Provider, circuit-breaker, and memory management endpoints. These never
//! touch the request pipeline directly; they mutate the same registries
//! the pipeline reads from.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use ctxproxy_core::provider::{list_templates, LLMProvider, ProviderRegistry, TemplateOverrides};
use ctxproxy_core::ProxyError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error_response::ApiError;
use crate::state::AppState;

pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ctxproxy_core::provider::PublicProvider>> {
    Json(state.providers.list().iter().map(LLMProvider::to_public).collect())
}

pub async fn add_provider(State(state): State<AppState>, Json(provider): Json<LLMProvider>) -> impl IntoResponse {
    let public = provider.to_public();
    state.providers.add(provider, false);
    (StatusCode::CREATED, Json(public))
}

#[derive(Deserialize, Default)]
pub struct PatchProviderRequest {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub default_model: Option<String>,
    pub models: Option<Vec<String>>,
    pub timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub enabled: Option<bool>,
    pub headers: Option<HashMap<String, String>>,
    pub extra_body: Option<HashMap<String, Value>>,
}

pub async fn patch_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<PatchProviderRequest>,
) -> Result<Json<ctxproxy_core::provider::PublicProvider>, ApiError> {
    let mut provider = state.providers.get(Some(&id)).ok_or_else(|| ProxyError::UnknownProvider(id.clone()))?;

    if let Some(name) = patch.name {
        provider.name = name;
    }
    if let Some(base_url) = patch.base_url {
        provider.base_url = base_url;
    }
    if let Some(api_key) = patch.api_key {
        provider.api_key = api_key;
    }
    if let Some(default_model) = patch.default_model {
        provider.default_model = default_model;
    }
    if let Some(models) = patch.models {
        provider.models = models;
    }
    if let Some(timeout) = patch.timeout {
        provider.timeout = timeout;
    }
    if let Some(max_retries) = patch.max_retries {
        provider.max_retries = max_retries;
    }
    if let Some(enabled) = patch.enabled {
        provider.enabled = enabled;
    }
    if let Some(headers) = patch.headers {
        provider.headers = headers;
    }
    if let Some(extra_body) = patch.extra_body {
        provider.extra_body = extra_body;
    }

    let public = provider.to_public();
    state.providers.add(provider, false);
    Ok(Json(public))
}

pub async fn delete_provider(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.providers.remove(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn list_templates_handler() -> Json<Vec<ctxproxy_core::provider::TemplateInfo>> {
    Json(list_templates())
}

#[derive(Deserialize)]
pub struct FromTemplateRequest {
    pub template_id: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(flatten)]
    pub overrides: TemplateOverrides,
}

pub async fn from_template(
    State(state): State<AppState>,
    Json(request): Json<FromTemplateRequest>,
) -> Result<(StatusCode, Json<ctxproxy_core::provider::PublicProvider>), ApiError> {
    let provider = ProviderRegistry::create_from_template(&request.template_id, request.provider_id, request.api_key, request.overrides)
        .ok_or_else(|| ProxyError::ClientValidation(format!("unknown provider template: {}", request.template_id)))?;
    let public = provider.to_public();
    state.providers.add(provider, false);
    Ok((StatusCode::CREATED, Json(public)))
}

pub async fn set_default_provider(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.providers.set_default(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_breakers(State(state): State<AppState>) -> Json<Value> {
    let entries: Vec<Value> = state
        .breakers
        .list()
        .into_iter()
        .map(|(name, breaker_state, stats)| json!({"name": name, "state": breaker_state, "stats": stats}))
        .collect();
    Json(json!(entries))
}

pub async fn get_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    let (breaker_state, stats) = state
        .breakers
        .state(&name)
        .ok_or_else(|| ProxyError::Internal(format!("no breaker named '{name}' has been observed yet")))?;
    Ok(Json(json!({"name": name, "state": breaker_state, "stats": stats})))
}

pub async fn reset_breaker(State(state): State<AppState>, Path(name): Path<String>) -> StatusCode {
    if state.breakers.reset(&name) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn reset_all_breakers(State(state): State<AppState>) -> StatusCode {
    state.breakers.reset_all();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct AddMemoryRequest {
    pub text: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn add_memory(State(state): State<AppState>, Json(request): Json<AddMemoryRequest>) -> Result<(StatusCode, Json<Value>), ApiError> {
    let memory = state.memory.as_ref().ok_or_else(|| ProxyError::ClientValidation("memory subsystem is disabled".to_string()))?;
    let id = memory.add_memory(&request.text, request.metadata).await?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub top_k: Option<usize>,
}

pub async fn search_memory(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ctxproxy_core::memory::MemoryResult>>, ApiError> {
    let memory = state.memory.as_ref().ok_or_else(|| ProxyError::ClientValidation("memory subsystem is disabled".to_string()))?;
    let results = memory.retrieve(&query.q, query.top_k.unwrap_or(3)).await?;
    Ok(Json(results))
}

pub async fn delete_memory(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let memory = state.memory.as_ref().ok_or_else(|| ProxyError::ClientValidation("memory subsystem is disabled".to_string()))?;
    if memory.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

pub async fn clear_memory(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let memory = state.memory.as_ref().ok_or_else(|| ProxyError::ClientValidation("memory subsystem is disabled".to_string()))?;
    memory.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}
