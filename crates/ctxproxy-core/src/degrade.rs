//! Graceful degradation: compose a circuit breaker with an optional
//! fallback so a misbehaving upstream capability degrades instead of
//! taking the whole request down with it.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::error::ProxyError;

#[async_trait]
pub trait Operation<T>: Send + Sync {
    async fn call(&self) -> Result<T, ProxyError>;
}

#[async_trait]
impl<T, F, Fut> Operation<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<T, ProxyError>> + Send,
    T: Send,
{
    async fn call(&self) -> Result<T, ProxyError> {
        (self)().await
    }
}

/// Wraps a breaker-guarded primary operation with an optional fallback.
pub struct DegradationStrategy {
    breaker: CircuitBreaker,
    fallback_on_open: bool,
}

impl DegradationStrategy {
    pub fn new(breaker: CircuitBreaker, fallback_on_open: bool) -> Self {
        DegradationStrategy { breaker, fallback_on_open }
    }

    /// Runs `primary` if the breaker allows it, recording the outcome.
    /// If the breaker denies the call, or `primary` fails, `fallback` (if
    /// given) is run instead; an undenied failure with no fallback
    /// propagates.
    pub async fn execute<T: Send>(
        &self,
        primary: &(dyn Operation<T> + Sync),
        fallback: Option<&(dyn Operation<T> + Sync)>,
        op_name: &str,
    ) -> Result<Option<T>, ProxyError> {
        if !self.breaker.can_execute() {
            if self.fallback_on_open {
                if let Some(fallback) = fallback {
                    warn!(op = op_name, "degradation.fallback_on_open");
                    return fallback.call().await.map(Some);
                }
            }
            return Ok(None);
        }

        match primary.call().await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(Some(value))
            }
            Err(err) => {
                self.breaker.record_failure();
                match fallback {
                    Some(fallback) => {
                        warn!(op = op_name, error = %err, "degradation.fallback_on_failure");
                        fallback.call().await.map(Some)
                    }
                    None => Err(err),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureStatus {
    pub enabled: bool,
    pub degraded: bool,
    pub last_error: Option<String>,
    pub description: String,
}

/// Maps named features (`"memory"`, `"forwarding"`, ...) to their current
/// status, independent of whatever `DegradationStrategy` backs them.
pub struct FeatureManager {
    features: RwLock<HashMap<String, FeatureStatus>>,
}

impl FeatureManager {
    pub fn new() -> Self {
        FeatureManager {
            features: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, description: impl Into<String>) {
        self.features.write().unwrap().insert(
            name.into(),
            FeatureStatus {
                enabled: true,
                degraded: false,
                last_error: None,
                description: description.into(),
            },
        );
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(status) = self.features.write().unwrap().get_mut(name) {
            status.enabled = enabled;
        }
    }

    pub fn mark_degraded(&self, name: &str, error: impl Into<String>) {
        if let Some(status) = self.features.write().unwrap().get_mut(name) {
            status.degraded = true;
            status.last_error = Some(error.into());
        }
    }

    pub fn mark_healthy(&self, name: &str) {
        if let Some(status) = self.features.write().unwrap().get_mut(name) {
            status.degraded = false;
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.features.read().unwrap().get(name).is_some_and(|s| s.enabled)
    }

    pub fn status(&self, name: &str) -> Option<FeatureStatus> {
        self.features.read().unwrap().get(name).cloned()
    }

    pub fn all(&self) -> HashMap<String, FeatureStatus> {
        self.features.read().unwrap().clone()
    }
}

impl Default for FeatureManager {
    fn default() -> Self {
        Self::new()
    }
}
