//! Shared, injected state handed to every axum handler.

use std::sync::Arc;
use std::time::Instant;

use ctxproxy_core::breaker::CircuitBreakerRegistry;
use ctxproxy_core::degrade::FeatureManager;
use ctxproxy_core::memory::MemoryRetriever;
use ctxproxy_core::pipeline::Pipeline;
use ctxproxy_core::provider::ProviderRegistry;
use ctxproxy_core::traffic::TrafficAnalyzer;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub providers: Arc<ProviderRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub features: Arc<FeatureManager>,
    pub traffic: Arc<TrafficAnalyzer>,
    pub memory: Option<Arc<MemoryRetriever>>,
    pub started_at: Instant,
}
