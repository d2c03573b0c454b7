//! Entry point: loads configuration from the environment, wires the
//! registries and the pipeline together, and serves the HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use ctxproxy_core::assemble::AssemblyConfig;
use ctxproxy_core::breaker::{BreakerConfig, CircuitBreakerRegistry};
use ctxproxy_core::degrade::FeatureManager;
use ctxproxy_core::embed::create_embedder;
use ctxproxy_core::memory::{MemoryRetriever, SqliteMemoryStore};
use ctxproxy_core::pipeline::{Pipeline, PipelineConfig};
use ctxproxy_core::provider::{LLMProvider, ProviderRegistry};
use ctxproxy_core::traffic::TrafficAnalyzer;
use ctxproxy_core::Settings;
use ctxproxy_service::routes;
use ctxproxy_service::state::AppState;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Overrides `HOST:PORT` from the environment.
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctxproxy_service=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let args = Args::parse();
    let settings = Settings::from_env().context("loading settings from environment")?;
    let addr = args.addr.unwrap_or_else(|| format!("{}:{}", settings.host, settings.port));

    info!(addr = %addr, memory_enabled = settings.memory_enabled, optimization_enabled = settings.optimization_enabled, "starting ctxproxy-service");

    let providers = Arc::new(ProviderRegistry::new());
    providers.add(
        LLMProvider {
            id: "default".to_string(),
            name: "default".to_string(),
            base_url: settings.llm_base_url.clone(),
            api_key: settings.llm_api_key.clone(),
            default_model: settings.llm_model.clone(),
            models: vec![settings.llm_model.clone()],
            timeout: settings.request_timeout,
            max_retries: settings.max_retries,
            enabled: true,
            headers: HashMap::new(),
            extra_body: HashMap::new(),
        },
        true,
    );

    let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
        failure_threshold: settings.circuit_breaker_threshold,
        recovery_timeout: Duration::from_secs(settings.circuit_breaker_timeout),
        ..BreakerConfig::default()
    }));

    let features = Arc::new(FeatureManager::new());
    features.register("memory", "vector memory augmentation");
    features.register("forwarding", "upstream chat-completion forwarding");

    let traffic = Arc::new(TrafficAnalyzer::new());

    let memory = if settings.memory_enabled {
        let embedder = create_embedder(&settings.embedding_model);
        match SqliteMemoryStore::connect(&settings.vector_db_path).await {
            Ok(store) => Some(Arc::new(MemoryRetriever::new(embedder, Box::new(store)))),
            Err(err) => {
                error!(error = %err, "memory store unavailable at startup, continuing without memory");
                features.mark_degraded("memory", err.to_string());
                None
            }
        }
    } else {
        features.set_enabled("memory", false);
        None
    };

    let pipeline_config = PipelineConfig {
        optimization_enabled: settings.optimization_enabled,
        max_memory_results: settings.max_memory_results,
        assembly: AssemblyConfig {
            preserve_last_n: settings.preserve_last_n_messages,
            max_history_tokens: settings.max_history_tokens,
            enable_system_cleanup: settings.system_prompt_cleanup,
            ..AssemblyConfig::default()
        },
    };

    let pipeline = Arc::new(Pipeline::new(
        pipeline_config,
        providers.clone(),
        breakers.clone(),
        memory.clone(),
        traffic.clone(),
    ));

    let state = AppState {
        pipeline,
        providers,
        breakers,
        features,
        traffic,
        memory,
        started_at: Instant::now(),
    };

    let app = Router::new().merge(routes::router()).layer(CorsLayer::permissive()).with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
