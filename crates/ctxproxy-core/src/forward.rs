//! HTTP forward client: sends the (possibly rewritten) request on to the
//! resolved provider, with retry/backoff and SSE-preserving streaming.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::provider::LLMProvider;

/// A buffered upstream response.
pub struct ForwardResponse {
    pub status: u16,
    pub body: Bytes,
    pub headers: HeaderMap,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProxyError>> + Send>>;

pub struct StreamedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

/// Strips a `provider_id:` prefix from `model` when it names this provider,
/// per §4.6's routing convention (`"kimi:moonshot-v1-8k"` -> `"moonshot-v1-8k"`).
fn strip_model_prefix(payload: &mut Value, provider_id: &str) {
    let Some(model) = payload.get("model").and_then(|m| m.as_str()) else {
        return;
    };
    if let Some((prefix, suffix)) = model.split_once(':') {
        if prefix == provider_id {
            let suffix = suffix.to_string();
            payload["model"] = Value::String(suffix);
        }
    }
}

/// Merges `provider.extra_body` into `payload`, with the provider's keys
/// winning on conflict.
fn merge_extra_body(payload: &mut Value, provider: &LLMProvider) {
    let Some(map) = payload.as_object_mut() else {
        return;
    };
    for (key, value) in &provider.extra_body {
        map.insert(key.clone(), value.clone());
    }
}

fn build_headers(provider: &LLMProvider) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", provider.api_key))
            .map_err(|e| ProxyError::Internal(format!("invalid api key header: {e}")))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in &provider.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ProxyError::Internal(format!("invalid provider header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ProxyError::Internal(format!("invalid provider header value: {e}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Exponential backoff per §4.6: `min(10s, max(1s, 2^attempt * 1s))`.
fn backoff_for_attempt(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt);
    Duration::from_secs(secs.clamp(1, 10))
}

fn is_transient_status(status: u16) -> bool {
    status >= 500
}

/// Sends chat-completion payloads upstream, retrying on transient failures
/// and streaming server-sent-event framing byte-for-byte.
pub struct ForwardClient {
    http: reqwest::Client,
}

impl ForwardClient {
    pub fn new() -> Self {
        ForwardClient {
            http: reqwest::Client::new(),
        }
    }

    fn prepare(&self, provider: &LLMProvider, mut payload: Value) -> Result<(String, Value, HeaderMap), ProxyError> {
        strip_model_prefix(&mut payload, &provider.id);
        merge_extra_body(&mut payload, provider);
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));
        let headers = build_headers(provider)?;
        Ok((url, payload, headers))
    }

    /// Buffered forward with retry on 5xx/transport errors. 4xx responses
    /// are returned verbatim without retrying.
    pub async fn forward(
        &self,
        provider: &LLMProvider,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<ForwardResponse, ProxyError> {
        let (url, payload, headers) = self.prepare(provider, payload)?;
        let timeout = Duration::from_secs(provider.timeout);

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ProxyError::Internal("request cancelled".to_string()));
            }

            debug!(url = %url, attempt, "forward.attempt");
            let send = self
                .http
                .post(&url)
                .headers(headers.clone())
                .json(&payload)
                .timeout(timeout)
                .send();

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ProxyError::Internal("request cancelled".to_string()));
                }
                result = send => result,
            };

            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if is_transient_status(status) && attempt < provider.max_retries {
                        warn!(status, attempt, "forward.transient_retry");
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(ProxyError::Internal("request cancelled".to_string())),
                            _ = tokio::time::sleep(backoff_for_attempt(attempt)) => {}
                        }
                        attempt += 1;
                        continue;
                    }

                    let response_headers = response.headers().clone();
                    let body = response.bytes().await.map_err(ProxyError::from)?;
                    return Ok(ForwardResponse {
                        status,
                        body,
                        headers: response_headers,
                    });
                }
                Err(err) if attempt < provider.max_retries && (err.is_timeout() || err.is_connect()) => {
                    warn!(error = %err, attempt, "forward.transport_retry");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ProxyError::Internal("request cancelled".to_string())),
                        _ = tokio::time::sleep(backoff_for_attempt(attempt)) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(ProxyError::from(err)),
            }
        }
    }

    /// Streaming forward. Retries apply only to establishing the initial
    /// POST; once bytes start arriving they are relayed verbatim.
    pub async fn stream(
        &self,
        provider: &LLMProvider,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<StreamedResponse, ProxyError> {
        let (url, payload, headers) = self.prepare(provider, payload)?;
        let timeout = Duration::from_secs(provider.timeout);

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ProxyError::Internal("request cancelled".to_string()));
            }

            let send = self
                .http
                .post(&url)
                .headers(headers.clone())
                .json(&payload)
                .timeout(timeout)
                .send();

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ProxyError::Internal("request cancelled".to_string())),
                result = send => result,
            };

            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if is_transient_status(status) && attempt < provider.max_retries {
                        warn!(status, attempt, "forward.stream_transient_retry");
                        tokio::time::sleep(backoff_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    let response_headers = response.headers().clone();
                    let cancel = cancel.clone();
                    let body: ByteStream = Box::pin(response.bytes_stream().map(move |chunk| {
                        if cancel.is_cancelled() {
                            return Err(ProxyError::Internal("request cancelled".to_string()));
                        }
                        chunk.map_err(ProxyError::from)
                    }));

                    return Ok(StreamedResponse {
                        status,
                        headers: response_headers,
                        body,
                    });
                }
                Err(err) if attempt < provider.max_retries && (err.is_timeout() || err.is_connect()) => {
                    warn!(error = %err, attempt, "forward.stream_transport_retry");
                    tokio::time::sleep(backoff_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(ProxyError::from(err)),
            }
        }
    }
}

impl Default for ForwardClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: String) -> LLMProvider {
        LLMProvider {
            id: "kimi".to_string(),
            name: "Kimi".to_string(),
            base_url,
            api_key: "secret-key".to_string(),
            default_model: "moonshot-v1-8k".to_string(),
            models: vec!["moonshot-v1-8k".to_string()],
            timeout: 5,
            max_retries: 2,
            enabled: true,
            headers: HashMap::new(),
            extra_body: HashMap::new(),
        }
    }

    #[test]
    fn model_prefix_is_stripped_for_owning_provider() {
        let mut payload = json!({"model": "kimi:moonshot-v1-8k"});
        strip_model_prefix(&mut payload, "kimi");
        assert_eq!(payload["model"], "moonshot-v1-8k");
    }

    #[test]
    fn model_prefix_untouched_for_other_provider() {
        let mut payload = json!({"model": "openai:gpt-4"});
        strip_model_prefix(&mut payload, "kimi");
        assert_eq!(payload["model"], "openai:gpt-4");
    }

    #[test]
    fn extra_body_provider_wins_on_conflict() {
        let mut payload = json!({"model": "gpt-4", "temperature": 0.7});
        let mut p = provider("https://example.com".to_string());
        p.extra_body.insert("temperature".to_string(), json!(0.2));
        p.extra_body.insert("top_p".to_string(), json!(0.9));
        merge_extra_body(&mut payload, &p);
        assert_eq!(payload["temperature"], 0.2);
        assert_eq!(payload["top_p"], 0.9);
    }

    #[test]
    fn backoff_is_clamped_between_one_and_ten_seconds() {
        assert_eq!(backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(5), Duration::from_secs(10));
        assert_eq!(backoff_for_attempt(20), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn forward_composes_url_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = ForwardClient::new();
        let p = provider(server.uri());
        let response = client
            .forward(&p, json!({"model": "kimi:moonshot-v1-8k"}), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn forward_retries_on_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let mut p = provider(server.uri());
        p.timeout = 2;
        let client = ForwardClient::new();
        let response = client
            .forward(&p, json!({"model": "x"}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn forward_does_not_retry_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad request"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ForwardClient::new();
        let p = provider(server.uri());
        let response = client
            .forward(&p, json!({"model": "x"}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_before_sending() {
        let client = ForwardClient::new();
        let p = provider("https://example.invalid".to_string());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.forward(&p, json!({"model": "x"}), &cancel).await;
        assert!(result.is_err());
    }
}
