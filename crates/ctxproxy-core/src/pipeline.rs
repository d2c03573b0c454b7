//! Orchestrates a single request through the full optimization pipeline:
//! sanitize -> classify -> (optional memory retrieval) -> assemble ->
//! validate -> (optional memory injection) -> forward -> account.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::assemble::{AssemblyConfig, ContextAssembler};
use crate::breaker::CircuitBreakerRegistry;
use crate::classifier::{IntentClassifier, RuleBasedClassifier};
use crate::error::ProxyError;
use crate::forward::{ForwardClient, ForwardResponse, StreamedResponse};
use crate::memory::MemoryRetriever;
use crate::provider::ProviderRegistry;
use crate::sanitize::sanitize;
use crate::traffic::{RequestMetrics, TrafficAnalyzer};
use crate::types::{ChatRequest, Intent, Message};
use crate::validate::validate_request;

const MEMORY_BREAKER_NAME: &str = "memory";

/// Config knobs the pipeline reads at request time; kept separate from
/// `crate::settings::Settings` so tests can construct it directly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub optimization_enabled: bool,
    pub max_memory_results: usize,
    pub assembly: AssemblyConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            optimization_enabled: true,
            max_memory_results: 3,
            assembly: AssemblyConfig::default(),
        }
    }
}

pub struct BufferedPipelineResponse {
    pub request_id: String,
    pub status: u16,
    pub body: Value,
    pub metrics: RequestMetrics,
}

pub struct StreamedPipelineResponse {
    pub request_id: String,
    pub status: u16,
    pub upstream: StreamedResponse,
}

/// Wires the sanitizer, classifier, assembler, validator, memory retriever,
/// forward client and traffic analyzer together for one request at a time.
/// Holds no per-request mutable state of its own; all of that lives in the
/// `ChatRequest`/flags/metrics values threaded through `process`/`stream`.
pub struct Pipeline {
    config: PipelineConfig,
    classifier: Box<dyn IntentClassifier>,
    assembler: ContextAssembler,
    forward_client: ForwardClient,
    providers: Arc<ProviderRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    memory: Option<Arc<MemoryRetriever>>,
    traffic: Arc<TrafficAnalyzer>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        providers: Arc<ProviderRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        memory: Option<Arc<MemoryRetriever>>,
        traffic: Arc<TrafficAnalyzer>,
    ) -> Self {
        Pipeline {
            assembler: ContextAssembler::new(config.assembly),
            config,
            classifier: Box::new(RuleBasedClassifier),
            forward_client: ForwardClient::new(),
            providers,
            breakers,
            memory,
            traffic,
        }
    }

    /// Steps 1-7: sanitize, classify, retrieve memory, assemble, validate,
    /// inject memory context. Shared by both `process` and `stream`.
    async fn prepare(&self, request: &ChatRequest, request_id: &str) -> (ChatRequest, Intent) {
        let flags = sanitize(request);
        let intent = self.classifier.classify(request);

        let memory_context = if intent == Intent::Retrieval {
            self.retrieve_memory_context(request, request_id).await
        } else {
            String::new()
        };

        let optimized = if self.config.optimization_enabled {
            let optimized = self.assembler.assemble(request, intent, &flags);
            if let Err(failure) = validate_request(request, &optimized) {
                error!(request_id, error = %failure, "pipeline.validation_failed");
            }
            optimized
        } else {
            info!(request_id, "pipeline.optimization_disabled");
            request.clone()
        };

        let optimized = inject_memory_context(optimized, &memory_context);
        (optimized, intent)
    }

    async fn retrieve_memory_context(&self, request: &ChatRequest, request_id: &str) -> String {
        let Some(memory) = &self.memory else {
            return String::new();
        };
        let Some(query) = request.last_user_content() else {
            return String::new();
        };

        if !self.breakers.can_execute(MEMORY_BREAKER_NAME) {
            warn!(request_id, "pipeline.memory_breaker_open");
            return String::new();
        }

        match memory.retrieve_for_context(query, self.config.max_memory_results, None).await {
            Ok(context) => {
                self.breakers.record_success(MEMORY_BREAKER_NAME);
                context
            }
            Err(err) => {
                self.breakers.record_failure(MEMORY_BREAKER_NAME);
                warn!(request_id, error = %err, "pipeline.memory_unavailable");
                String::new()
            }
        }
    }

    /// Non-streaming path: full pipeline plus a buffered forward and
    /// traffic accounting.
    #[instrument(skip(self, request), fields(request_id = tracing::field::Empty))]
    pub async fn process(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<BufferedPipelineResponse, ProxyError> {
        let request_id = new_request_id();
        tracing::Span::current().record("request_id", request_id.as_str());
        let start = Instant::now();

        let original = request.clone();
        let (optimized, intent) = self.prepare(&request, &request_id).await;

        let provider = self.providers.get_for_model(&optimized.model)?;
        let payload = serde_json::to_value(&optimized)?;

        if !self.breakers.can_execute(&provider.id) {
            return Err(ProxyError::BreakerOpen {
                name: provider.id.clone(),
                retry_after_secs: self.breakers.retry_after_secs(&provider.id),
            });
        }

        let forwarded = self.forward_client.forward(&provider, payload, cancel).await;
        let forwarded = match forwarded {
            Ok(response) => {
                record_outcome(&self.breakers, &provider.id, response.status);
                response
            }
            Err(err) => {
                self.breakers.record_failure(&provider.id);
                return Err(err);
            }
        };

        let response_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let metrics = self.traffic.analyze_request(
            request_id.clone(),
            original.model.clone(),
            &original.messages,
            &optimized.messages,
            intent,
            self.config.optimization_enabled,
            response_time_ms,
        );

        info!(request_id = %request_id, response_time_ms, tokens_saved = metrics.tokens_saved, "pipeline.complete");

        let status = forwarded.status;
        let body = parse_upstream_body(&forwarded);
        status_to_result(status, body.clone())?;

        Ok(BufferedPipelineResponse {
            request_id,
            status,
            body,
            metrics,
        })
    }

    /// Streaming path: same steps 1-7, then a tee'd byte stream. Token
    /// accounting is deferred for streamed responses (see DESIGN.md).
    #[instrument(skip(self, request), fields(request_id = tracing::field::Empty))]
    pub async fn stream(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<StreamedPipelineResponse, ProxyError> {
        let request_id = new_request_id();
        tracing::Span::current().record("request_id", request_id.as_str());

        let (optimized, _intent) = self.prepare(&request, &request_id).await;
        let provider = self.providers.get_for_model(&optimized.model)?;
        let payload = serde_json::to_value(&optimized)?;

        if !self.breakers.can_execute(&provider.id) {
            return Err(ProxyError::BreakerOpen {
                name: provider.id.clone(),
                retry_after_secs: self.breakers.retry_after_secs(&provider.id),
            });
        }

        let upstream = match self.forward_client.stream(&provider, payload, cancel).await {
            Ok(streamed) => {
                record_outcome(&self.breakers, &provider.id, streamed.status);
                streamed
            }
            Err(err) => {
                self.breakers.record_failure(&provider.id);
                return Err(err);
            }
        };

        Ok(StreamedPipelineResponse {
            request_id,
            status: upstream.status,
            upstream,
        })
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// 2xx/4xx responses mean the dependency is up and responding; only a
/// persistent 5xx (everything the forward client's own retries couldn't
/// resolve) counts as a breaker failure.
fn record_outcome(breakers: &CircuitBreakerRegistry, provider_id: &str, status: u16) {
    if status >= 500 {
        breakers.record_failure(provider_id);
    } else {
        breakers.record_success(provider_id);
    }
}

fn parse_upstream_body(response: &ForwardResponse) -> Value {
    serde_json::from_slice(&response.body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&response.body).into_owned()))
}

fn status_to_result(status: u16, body: Value) -> Result<(), ProxyError> {
    if status >= 500 {
        return Err(ProxyError::UpstreamTransient(body.to_string()));
    }
    if (400..500).contains(&status) {
        return Err(ProxyError::UpstreamPermanent { status, body: body.to_string() });
    }
    Ok(())
}

/// Injects a memory-context block into the system message: appended to an
/// existing one, or inserted as a fresh system message at index 0.
fn inject_memory_context(mut request: ChatRequest, context: &str) -> ChatRequest {
    if context.is_empty() {
        return request;
    }

    if let Some(system) = request.messages.iter_mut().find(|m| m.role == "system") {
        let merged = match &system.content {
            Some(existing) => format!("{existing}\n\n{context}"),
            None => context.to_string(),
        };
        system.content = Some(merged);
    } else {
        request.messages.insert(0, Message::system(context.to_string()));
    }

    request
}
