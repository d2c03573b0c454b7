//! Static, config-driven provider registry.
//!
//! Unlike a plugin host that loads vendor adapters dynamically, providers
//! here are plain data: a base URL, an API key, and the model names routed
//! to it. Templates exist purely to pre-fill that data for well-known
//! vendors.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::ProxyError;

/// A registered upstream, addressable by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMProvider {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub extra_body: HashMap<String, Value>,
}

fn default_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_enabled() -> bool {
    true
}

/// `LLMProvider` with `api_key` redacted to a presence flag, safe to
/// return from the management API.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProvider {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub default_model: String,
    pub models: Vec<String>,
    pub timeout: u64,
    pub max_retries: u32,
    pub enabled: bool,
    pub has_api_key: bool,
}

impl LLMProvider {
    pub fn to_public(&self) -> PublicProvider {
        PublicProvider {
            id: self.id.clone(),
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            default_model: self.default_model.clone(),
            models: self.models.clone(),
            timeout: self.timeout,
            max_retries: self.max_retries,
            enabled: self.enabled,
            has_api_key: !self.api_key.is_empty(),
        }
    }
}

/// One entry of the closed template registry.
#[derive(Debug, Clone)]
struct ProviderTemplate {
    name: &'static str,
    base_url: &'static str,
    default_model: &'static str,
    models: &'static [&'static str],
}

/// Templates are looked up by a fixed id string rather than an enum so the
/// set can be enumerated generically for the `/config/templates` endpoint.
const TEMPLATES: &[(&str, ProviderTemplate)] = &[
    (
        "openai",
        ProviderTemplate {
            name: "OpenAI",
            base_url: "https://api.openai.com/v1",
            default_model: "gpt-4o",
            models: &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"],
        },
    ),
    (
        "kimi",
        ProviderTemplate {
            name: "Kimi (Moonshot)",
            base_url: "https://api.moonshot.cn/v1",
            default_model: "moonshot-v1-8k",
            models: &["moonshot-v1-8k", "moonshot-v1-32k", "moonshot-v1-128k"],
        },
    ),
    (
        "qwen",
        ProviderTemplate {
            name: "Qwen (Alibaba)",
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
            default_model: "qwen-max",
            models: &["qwen-max", "qwen-plus", "qwen-turbo", "qwen-coder-plus"],
        },
    ),
    (
        "claude",
        ProviderTemplate {
            name: "Claude (Anthropic)",
            base_url: "https://api.anthropic.com/v1",
            default_model: "claude-3-5-sonnet-20241022",
            models: &[
                "claude-3-5-sonnet-20241022",
                "claude-3-5-haiku-20241022",
                "claude-3-opus-20240229",
            ],
        },
    ),
    (
        "glm",
        ProviderTemplate {
            name: "ChatGLM (Zhipu)",
            base_url: "https://open.bigmodel.cn/api/paas/v4",
            default_model: "glm-4-plus",
            models: &["glm-4-plus", "glm-4-air", "glm-4-flash", "glm-4-long"],
        },
    ),
    (
        "siliconflow",
        ProviderTemplate {
            name: "Silicon Flow",
            base_url: "https://api.siliconflow.cn/v1",
            default_model: "Qwen/Qwen2.5-72B-Instruct",
            models: &[
                "Qwen/Qwen2.5-72B-Instruct",
                "meta-llama/Llama-3.3-70B-Instruct",
                "deepseek-ai/DeepSeek-V2.5",
            ],
        },
    ),
    (
        "deepseek",
        ProviderTemplate {
            name: "DeepSeek",
            base_url: "https://api.deepseek.com/v1",
            default_model: "deepseek-chat",
            models: &["deepseek-chat", "deepseek-coder"],
        },
    ),
    (
        "azure",
        ProviderTemplate {
            name: "Azure OpenAI",
            base_url: "",
            default_model: "gpt-4",
            models: &["gpt-4", "gpt-4-32k", "gpt-35-turbo"],
        },
    ),
];

fn find_template(template_id: &str) -> Option<&'static ProviderTemplate> {
    TEMPLATES.iter().find(|(id, _)| *id == template_id).map(|(_, t)| t)
}

/// Template payload as surfaced to `/config/templates`.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub default_model: String,
    pub models: Vec<String>,
}

pub fn list_templates() -> Vec<TemplateInfo> {
    TEMPLATES
        .iter()
        .map(|(id, t)| TemplateInfo {
            id: id.to_string(),
            name: t.name.to_string(),
            base_url: t.base_url.to_string(),
            default_model: t.default_model.to_string(),
            models: t.models.iter().map(|m| m.to_string()).collect(),
        })
        .collect()
}

/// Overrides accepted when instantiating a provider from a template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateOverrides {
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub models: Option<Vec<String>>,
    pub timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub headers: Option<HashMap<String, String>>,
    pub extra_body: Option<HashMap<String, Value>>,
}

/// Order-preserving provider registry: insertion order drives the
/// fallback scan in `get_for_model`, so a plain `Vec` behind a lock is
/// used rather than a `HashMap`.
pub struct ProviderRegistry {
    providers: RwLock<Vec<LLMProvider>>,
    default_id: RwLock<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            providers: RwLock::new(Vec::new()),
            default_id: RwLock::new(None),
        }
    }

    pub fn add(&self, provider: LLMProvider, set_default: bool) {
        let mut providers = self.providers.write().unwrap();
        let mut default_id = self.default_id.write().unwrap();

        if let Some(existing) = providers.iter_mut().find(|p| p.id == provider.id) {
            *existing = provider.clone();
        } else {
            providers.push(provider.clone());
        }

        if set_default || default_id.is_none() {
            *default_id = Some(provider.id.clone());
        }
        info!(provider_id = %provider.id, "provider.added");
    }

    pub fn create_from_template(
        template_id: &str,
        provider_id: Option<String>,
        api_key: String,
        overrides: TemplateOverrides,
    ) -> Option<LLMProvider> {
        let template = find_template(template_id)?;
        Some(LLMProvider {
            id: provider_id.unwrap_or_else(|| template_id.to_string()),
            name: template.name.to_string(),
            base_url: overrides.base_url.unwrap_or_else(|| template.base_url.to_string()),
            api_key,
            default_model: overrides.default_model.unwrap_or_else(|| template.default_model.to_string()),
            models: overrides
                .models
                .unwrap_or_else(|| template.models.iter().map(|m| m.to_string()).collect()),
            timeout: overrides.timeout.unwrap_or(120),
            max_retries: overrides.max_retries.unwrap_or(3),
            enabled: true,
            headers: overrides.headers.unwrap_or_default(),
            extra_body: overrides.extra_body.unwrap_or_default(),
        })
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut providers = self.providers.write().unwrap();
        let Some(pos) = providers.iter().position(|p| p.id == id) else {
            return false;
        };
        providers.remove(pos);

        let mut default_id = self.default_id.write().unwrap();
        if default_id.as_deref() == Some(id) {
            *default_id = providers.first().map(|p| p.id.clone());
        }
        info!(provider_id = id, "provider.removed");
        true
    }

    pub fn get(&self, id: Option<&str>) -> Option<LLMProvider> {
        let providers = self.providers.read().unwrap();
        let id = id.map(str::to_string).or_else(|| self.default_id.read().unwrap().clone())?;
        providers.iter().find(|p| p.id == id).cloned()
    }

    pub fn list(&self) -> Vec<LLMProvider> {
        self.providers.read().unwrap().clone()
    }

    pub fn set_default(&self, id: &str) -> Result<(), ProxyError> {
        let providers = self.providers.read().unwrap();
        if !providers.iter().any(|p| p.id == id) {
            return Err(ProxyError::UnknownProvider(id.to_string()));
        }
        *self.default_id.write().unwrap() = Some(id.to_string());
        Ok(())
    }

    pub fn default_id(&self) -> Option<String> {
        self.default_id.read().unwrap().clone()
    }

    /// `get_for_model` resolution order: `provider:model` prefix, then
    /// insertion-order scan of enabled providers whose `models` list
    /// contains `model`, then the default provider.
    pub fn get_for_model(&self, model: &str) -> Result<LLMProvider, ProxyError> {
        let providers = self.providers.read().unwrap();

        if let Some((prefix, _)) = model.split_once(':') {
            if let Some(provider) = providers.iter().find(|p| p.id == prefix && p.enabled) {
                return Ok(provider.clone());
            }
        }

        if let Some(provider) = providers.iter().find(|p| p.enabled && p.models.iter().any(|m| m == model)) {
            return Ok(provider.clone());
        }
        drop(providers);

        self.get(None).ok_or_else(|| ProxyError::UnknownProvider(model.to_string()))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: &str, models: &[&str]) -> LLMProvider {
        LLMProvider {
            id: id.to_string(),
            name: id.to_string(),
            base_url: "https://example.com".to_string(),
            api_key: "secret".to_string(),
            default_model: models.first().map(|m| m.to_string()).unwrap_or_default(),
            models: models.iter().map(|m| m.to_string()).collect(),
            timeout: 120,
            max_retries: 3,
            enabled: true,
            headers: HashMap::new(),
            extra_body: HashMap::new(),
        }
    }

    #[test]
    fn first_added_becomes_default() {
        let registry = ProviderRegistry::new();
        registry.add(provider("a", &["gpt-4"]), false);
        registry.add(provider("b", &["claude-3"]), false);
        assert_eq!(registry.default_id(), Some("a".to_string()));
    }

    #[test]
    fn set_default_true_overrides_first_writer() {
        let registry = ProviderRegistry::new();
        registry.add(provider("a", &["gpt-4"]), false);
        registry.add(provider("b", &["claude-3"]), true);
        assert_eq!(registry.default_id(), Some("b".to_string()));
    }

    #[test]
    fn model_routes_to_owning_provider() {
        let registry = ProviderRegistry::new();
        registry.add(provider("a", &["gpt-4"]), false);
        registry.add(provider("b", &["claude-3"]), false);
        let resolved = registry.get_for_model("claude-3").unwrap();
        assert_eq!(resolved.id, "b");
    }

    #[test]
    fn provider_prefixed_model_routes_by_id() {
        let registry = ProviderRegistry::new();
        registry.add(provider("kimi", &["moonshot-v1-8k"]), false);
        let resolved = registry.get_for_model("kimi:some-custom-model").unwrap();
        assert_eq!(resolved.id, "kimi");
    }

    #[test]
    fn disabled_provider_is_skipped_in_model_scan() {
        let registry = ProviderRegistry::new();
        let mut a = provider("a", &["gpt-4"]);
        a.enabled = false;
        registry.add(a, false);
        registry.add(provider("b", &["other"]), false);
        let resolved = registry.get_for_model("gpt-4").unwrap();
        assert_eq!(resolved.id, "b");
    }

    #[test]
    fn unmatched_model_falls_back_to_default() {
        let registry = ProviderRegistry::new();
        registry.add(provider("a", &["gpt-4"]), false);
        let resolved = registry.get_for_model("some-unlisted-model").unwrap();
        assert_eq!(resolved.id, "a");
    }

    #[test]
    fn no_providers_is_unknown_provider_error() {
        let registry = ProviderRegistry::new();
        assert!(matches!(registry.get_for_model("gpt-4"), Err(ProxyError::UnknownProvider(_))));
    }

    #[test]
    fn public_provider_never_exposes_api_key() {
        let p = provider("a", &["gpt-4"]);
        let public = p.to_public();
        assert!(public.has_api_key);
        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("secret"));
    }

    #[test]
    fn removing_default_promotes_another_provider() {
        let registry = ProviderRegistry::new();
        registry.add(provider("a", &["gpt-4"]), false);
        registry.add(provider("b", &["claude-3"]), false);
        registry.remove("a");
        assert_eq!(registry.default_id(), Some("b".to_string()));
    }

    #[test]
    fn set_default_rejects_unknown_id() {
        let registry = ProviderRegistry::new();
        registry.add(provider("a", &["gpt-4"]), false);
        assert!(registry.set_default("missing").is_err());
    }

    #[test]
    fn from_template_fills_base_url_and_models() {
        let p = ProviderRegistry::create_from_template("claude", None, "key".to_string(), TemplateOverrides::default()).unwrap();
        assert_eq!(p.base_url, "https://api.anthropic.com/v1");
        assert_eq!(p.default_model, "claude-3-5-sonnet-20241022");
        assert_eq!(p.id, "claude");
    }

    #[test]
    fn from_template_overrides_win() {
        let overrides = TemplateOverrides {
            base_url: Some("https://my-proxy.internal".to_string()),
            ..Default::default()
        };
        let p = ProviderRegistry::create_from_template("openai", Some("openai-custom".to_string()), "key".to_string(), overrides).unwrap();
        assert_eq!(p.id, "openai-custom");
        assert_eq!(p.base_url, "https://my-proxy.internal");
    }

    #[test]
    fn unknown_template_returns_none() {
        assert!(ProviderRegistry::create_from_template("nonexistent", None, String::new(), TemplateOverrides::default()).is_none());
    }

    #[test]
    fn list_templates_is_closed_set_of_eight() {
        assert_eq!(list_templates().len(), 8);
    }
}
