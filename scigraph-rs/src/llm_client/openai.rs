//! OpenAI LLM client implementation.
//!
//! Uses `async-openai` for API calls and `moka` for response caching, so
//! re-running a document with an unchanged prompt does not pay for a second
//! completion.

use std::time::Duration;

use moka::future::Cache;
use serde_json::json;
use tracing::debug;

use crate::errors::{LlmError, Result, ScigraphError};
use crate::utils::extract_json_from_response;

use super::{LlmClient, Message};

// ── Cache configuration ───────────────────────────────────────────────────────

/// Configuration for the in-process response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held in memory.
    pub max_capacity: u64,
    /// How long each entry lives before eviction.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1_000,
            ttl: Duration::from_secs(3_600),
        }
    }
}

/// Extraction must be repeatable, so sampling is greedy.
const TEMPERATURE: f32 = 0.0;

// ── Client struct ─────────────────────────────────────────────────────────────

/// OpenAI LLM client implementing [`LlmClient`].
pub struct OpenAiClient {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    max_tokens: u32,
    /// Keyed by `md5(prefix + model + messages)` → response text.
    cache: Cache<String, String>,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        cache_config: CacheConfig,
    ) -> Self {
        let config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        Self::with_config(config, model, cache_config)
    }

    /// Build a client against an explicit `async-openai` config (custom base URL,
    /// organization, ...).
    pub fn with_config(
        config: async_openai::config::OpenAIConfig,
        model: impl Into<String>,
        cache_config: CacheConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(cache_config.max_capacity)
            .time_to_live(cache_config.ttl)
            .build();

        Self {
            client: async_openai::Client::with_config(config),
            model: model.into(),
            max_tokens: 8_192,
            cache,
        }
    }

    /// Override the max output token limit (default `8192`).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn cache_key(&self, prefix: &str, messages: &[Message]) -> String {
        use md5::{Digest, Md5};
        let mut h = Md5::new();
        h.update(prefix.as_bytes());
        h.update(self.model.as_bytes());
        for m in messages {
            h.update(m.role.as_str().as_bytes());
            h.update(m.content.as_bytes());
        }
        format!("{:x}", h.finalize())
    }

    fn messages_to_json(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect()
    }

    /// Run one completion, consulting the cache first.
    async fn complete(&self, key: String, request: serde_json::Value) -> Result<String> {
        if let Some(cached) = self.cache.get(&key).await {
            debug!("LLM cache hit");
            return Ok(cached);
        }

        let response: serde_json::Value = self
            .client
            .chat()
            .create_byot(request)
            .await
            .map_err(map_openai_error)?;

        let content = Self::extract_content(&response)?;
        self.cache.insert(key, content.clone()).await;
        Ok(content)
    }

    fn extract_content(response: &serde_json::Value) -> Result<String> {
        let message = &response["choices"][0]["message"];
        if message["refusal"].is_string() {
            return Err(LlmError::Refusal.into());
        }
        message["content"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(ToOwned::to_owned)
            .ok_or(ScigraphError::Llm(LlmError::EmptyResponse))
    }
}

// ── LlmClient implementation ──────────────────────────────────────────────────

impl LlmClient for OpenAiClient {
    async fn generate_json(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let prefix = format!("json:{schema}");
        let request = json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
            "temperature": TEMPERATURE,
            "max_tokens": self.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema,
                    "strict": false,
                }
            }
        });

        let content = self.complete(self.cache_key(&prefix, messages), request).await?;
        let raw = extract_json_from_response(&content)
            .ok_or_else(|| LlmError::MalformedResponse("no JSON found in response".into()))?;
        serde_json::from_str(raw)
            .map_err(|e| ScigraphError::Llm(LlmError::MalformedResponse(e.to_string())))
    }
}

/// Map an [`async_openai::error::OpenAIError`] to our [`LlmError`] domain type.
fn map_openai_error(err: async_openai::error::OpenAIError) -> ScigraphError {
    use async_openai::error::OpenAIError;

    let llm_err = match err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err
                .code
                .as_ref()
                .map(|c| c.to_string().trim_matches('"').to_string());
            match code.as_deref() {
                Some("invalid_api_key") | Some("invalid_organization") => LlmError::Authentication,
                Some("rate_limit_exceeded") => LlmError::RateLimit,
                _ if api_err.r#type.as_deref() == Some("server_error") => {
                    LlmError::Transport(api_err.message)
                }
                _ => LlmError::Api {
                    code,
                    message: api_err.message,
                },
            }
        }
        OpenAIError::Reqwest(e) => LlmError::Transport(e.to_string()),
        other => LlmError::Api {
            code: None,
            message: other.to_string(),
        },
    };
    ScigraphError::Llm(llm_err)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
