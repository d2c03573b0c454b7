//! Request-processing pipeline for a context-optimizing chat-completion
//! proxy: sanitizes, classifies, assembles a token-budgeted window,
//! optionally augments with retrieved memory, and forwards to an
//! OpenAI-compatible upstream behind a per-provider circuit breaker.

/// Sliding-window context assembly under a token/message budget.
pub mod assemble;

/// Per-provider circuit breaker and its registry.
pub mod breaker;

/// Rule-based conversational intent classification.
pub mod classifier;

/// Graceful degradation: breaker + fallback composition, feature status.
pub mod degrade;

/// Pluggable text embedders for the memory subsystem.
pub mod embed;

/// Structured error taxonomy.
pub mod error;

/// HTTP forward client: retry, backoff, and SSE-preserving streaming.
pub mod forward;

/// Vector memory storage and retrieval.
pub mod memory;

/// End-to-end request orchestration.
pub mod pipeline;

/// Static, config-driven upstream provider registry.
pub mod provider;

/// Request sanitizer: derives per-message preservation flags.
pub mod sanitize;

/// Process-start configuration loaded from the environment.
pub mod settings;

/// Deterministic character-based token estimation.
pub mod token;

/// Traffic analyzer: per-request token accounting and rolling stats.
pub mod traffic;

/// Wire-level data model shared across the pipeline.
pub mod types;

/// Post-assembly output validation.
pub mod validate;

pub use error::ProxyError;
pub use pipeline::{Pipeline, PipelineConfig};
pub use settings::Settings;
pub use types::{ChatRequest, Intent, Message};
