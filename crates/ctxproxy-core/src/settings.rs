//! Process-start configuration, loaded once from the environment contract
//! of §6. An absent variable always falls back to its default; a present
//! but malformed one is a startup error.

use std::env;

use crate::error::ProxyError;

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub log_level: String,

    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,

    pub request_timeout: u64,
    pub max_retries: u32,

    pub memory_enabled: bool,
    pub vector_db_path: String,
    pub embedding_model: String,
    pub embedding_device: String,
    pub max_memory_results: usize,

    pub optimization_enabled: bool,
    pub preserve_last_n_messages: usize,
    pub max_history_tokens: usize,
    pub system_prompt_cleanup: bool,

    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: String::new(),
            llm_model: "gpt-4".to_string(),
            request_timeout: 120,
            max_retries: 3,
            memory_enabled: true,
            vector_db_path: "./memory_store/vectors.db".to_string(),
            embedding_model: "hash".to_string(),
            embedding_device: "cpu".to_string(),
            max_memory_results: 3,
            optimization_enabled: true,
            preserve_last_n_messages: 2,
            max_history_tokens: 2000,
            system_prompt_cleanup: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: 60,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ProxyError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ProxyError::ClientValidation(format!("invalid value for {name}: {raw:?}"))),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ProxyError::ClientValidation(format!("{name} is not valid unicode"))),
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    /// Load settings from the process environment, falling back to
    /// defaults for anything unset. Fails only on a present-but-malformed
    /// numeric/boolean variable.
    pub fn from_env() -> Result<Self, ProxyError> {
        let defaults = Settings::default();
        Ok(Settings {
            host: env_string("HOST", &defaults.host),
            port: parse_env("PORT", defaults.port)?,
            log_level: env_string("LOG_LEVEL", &defaults.log_level),
            llm_base_url: env_string("LLM_BASE_URL", &defaults.llm_base_url),
            llm_api_key: env_string("LLM_API_KEY", &defaults.llm_api_key),
            llm_model: env_string("LLM_MODEL", &defaults.llm_model),
            request_timeout: parse_env("REQUEST_TIMEOUT", defaults.request_timeout)?,
            max_retries: parse_env("MAX_RETRIES", defaults.max_retries)?,
            memory_enabled: parse_env("MEMORY_ENABLED", defaults.memory_enabled)?,
            vector_db_path: env_string("VECTOR_DB_PATH", &defaults.vector_db_path),
            embedding_model: env_string("EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_device: env_string("EMBEDDING_DEVICE", &defaults.embedding_device),
            max_memory_results: parse_env("MAX_MEMORY_RESULTS", defaults.max_memory_results)?,
            optimization_enabled: parse_env("OPTIMIZATION_ENABLED", defaults.optimization_enabled)?,
            preserve_last_n_messages: parse_env("PRESERVE_LAST_N_MESSAGES", defaults.preserve_last_n_messages)?,
            max_history_tokens: parse_env("MAX_HISTORY_TOKENS", defaults.max_history_tokens)?,
            system_prompt_cleanup: parse_env("SYSTEM_PROMPT_CLEANUP", defaults.system_prompt_cleanup)?,
            circuit_breaker_threshold: parse_env("CIRCUIT_BREAKER_THRESHOLD", defaults.circuit_breaker_threshold)?,
            circuit_breaker_timeout: parse_env("CIRCUIT_BREAKER_TIMEOUT", defaults.circuit_breaker_timeout)?,
        })
    }
}
