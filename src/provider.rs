//! Text Completion Provider
//!
//! The completion capability consumed by the drafting stages and the judges:
//! `complete(prompt, hint) -> {text, usage}`. The hint selects a configured model profile
//! (drafting or judging); the profile also carries the pricing used for cost accounting.
//! One HTTP client speaks the OpenAI-compatible chat-completions dialect, which covers
//! hosted OpenAI, Ollama's `/v1` surface and custom local servers.

use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Which configured model a call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHint {
    Drafting,
    Judging,
}

impl ModelHint {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelHint::Drafting => "drafting",
            ModelHint::Judging => "judging",
        }
    }

    /// System message sent ahead of every prompt with this hint.
    fn system_message(self) -> &'static str {
        match self {
            ModelHint::Drafting => {
                "You write clear, well-structured teaching material in markdown. \
                 Follow the requested format exactly."
            }
            ModelHint::Judging => {
                "You grade lesson documents against a rubric. \
                 Answer with the requested JSON object only."
            }
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Text-completion capability.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, hint: ModelHint) -> Result<Completion, ApiError>;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}

/// Model selection and pricing for one hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// USD per 1000 prompt tokens
    #[serde(default)]
    pub prompt_usd_per_1k: f64,
    /// USD per 1000 completion tokens
    #[serde(default)]
    pub completion_usd_per_1k: f64,
}

impl ModelProfile {
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.prompt_usd_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.completion_usd_per_1k
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_drafting_profile")]
    pub drafting: ModelProfile,
    #[serde(default = "default_judging_profile")]
    pub judging: ModelProfile,
}

fn default_drafting_profile() -> ModelProfile {
    ModelProfile {
        model: "gpt-4o-mini".to_string(),
        temperature: Some(0.7),
        max_tokens: Some(4096),
        prompt_usd_per_1k: 0.00015,
        completion_usd_per_1k: 0.0006,
    }
}

fn default_judging_profile() -> ModelProfile {
    ModelProfile {
        model: "gpt-4o".to_string(),
        temperature: Some(0.2),
        max_tokens: Some(1024),
        prompt_usd_per_1k: 0.0025,
        completion_usd_per_1k: 0.01,
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            drafting: default_drafting_profile(),
            judging: default_judging_profile(),
        }
    }
}

impl ModelsConfig {
    pub fn profile(&self, hint: ModelHint) -> &ModelProfile {
        match hint {
            ModelHint::Drafting => &self.drafting,
            ModelHint::Judging => &self.judging,
        }
    }

    pub fn cost(&self, hint: ModelHint, usage: &TokenUsage) -> f64 {
        self.profile(hint).cost(usage)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (hint, profile) in [
            (ModelHint::Drafting, &self.drafting),
            (ModelHint::Judging, &self.judging),
        ] {
            if profile.model.trim().is_empty() {
                return Err(format!("{} model cannot be empty", hint.as_str()));
            }
            if profile.prompt_usd_per_1k < 0.0 || profile.completion_usd_per_1k < 0.0 {
                return Err(format!("{} pricing cannot be negative", hint.as_str()));
            }
            if let Some(t) = profile.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(format!(
                        "{} temperature must be within 0.0-2.0",
                        hint.as_str()
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Ollama,
    LocalCustom,
}

impl ProviderType {
    fn default_endpoint(self) -> Option<&'static str> {
        match self {
            ProviderType::OpenAI => Some("https://api.openai.com/v1"),
            ProviderType::Ollama => Some("http://localhost:11434/v1"),
            ProviderType::LocalCustom => None,
        }
    }
}

/// Provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_type")]
    pub provider_type: ProviderType,
    /// Base URL; defaults per provider type
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Literal API key (prefer `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
}

fn default_provider_type() -> ProviderType {
    ProviderType::OpenAI
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            endpoint: None,
            api_key: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.provider_type == ProviderType::LocalCustom && self.endpoint.is_none() {
            return Err("Custom local provider requires an endpoint".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Endpoint must be an http(s) URL: {}", endpoint));
            }
        }
        Ok(())
    }

    pub fn resolve_endpoint(&self) -> Result<String, ApiError> {
        self.endpoint
            .clone()
            .or_else(|| self.provider_type.default_endpoint().map(str::to_string))
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                ApiError::ProviderNotConfigured("Provider endpoint is not set".to_string())
            })
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty())
        })
    }
}

// Chat-completions wire format
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatReply {
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn map_http_error(error: reqwest::Error) -> ApiError {
    if let Some(status) = error.status() {
        status_error(status.as_u16(), error.to_string())
    } else if error.is_timeout() {
        ApiError::ProviderTimeout(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ApiError::ProviderRequestFailed(format!("Connection error: {}", error))
    } else {
        ApiError::ProviderError(format!("HTTP error: {}", error))
    }
}

fn status_error(status: u16, detail: String) -> ApiError {
    match status {
        401 | 403 => ApiError::ProviderAuthFailed(format!("Authentication failed: {}", detail)),
        404 => ApiError::ProviderModelNotFound(format!("Model not found: {}", detail)),
        408 | 504 => ApiError::ProviderTimeout(format!("Upstream timeout: {}", detail)),
        429 => ApiError::ProviderRateLimit(format!("Rate limit exceeded: {}", detail)),
        500..=599 => ApiError::ProviderRequestFailed(format!(
            "Request failed with status {}: {}",
            status, detail
        )),
        _ => ApiError::ProviderError(format!("Request failed with status {}: {}", status, detail)),
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

fn http_client() -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ApiError::ProviderError(format!("Failed to create HTTP client: {}", e)))
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAICompatibleClient {
    client: Client,
    provider_name: String,
    base_url: String,
    api_key: Option<String>,
    models: ModelsConfig,
}

impl OpenAICompatibleClient {
    pub fn new(provider: &ProviderConfig, models: ModelsConfig) -> Result<Self, ApiError> {
        let client = http_client()?;
        let base_url = provider.resolve_endpoint()?;
        let api_key = provider.resolve_api_key();
        if provider.provider_type == ProviderType::OpenAI && api_key.is_none() {
            return Err(ApiError::ProviderNotConfigured(
                "OpenAI provider requires an API key (set api_key or api_key_env)".to_string(),
            ));
        }
        let provider_name = match provider.provider_type {
            ProviderType::OpenAI => "openai",
            ProviderType::Ollama => "ollama",
            ProviderType::LocalCustom => "local-custom",
        };
        Ok(Self {
            client,
            provider_name: provider_name.to_string(),
            base_url,
            api_key,
            models,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete(&self, prompt: &str, hint: ModelHint) -> Result<Completion, ApiError> {
        let profile = self.models.profile(hint);
        let request = ChatRequest {
            model: profile.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: hint.system_message().to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        let response = builder.json(&request).send().await.map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, error_text));
        }

        let completion: ChatReply = response
            .json()
            .await
            .map_err(|e| ApiError::MalformedOutput(format!("Failed to parse response: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::MalformedOutput("No choices in response".to_string()))?;

        let usage = completion
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            text: choice.message.content,
            model: completion.model,
            usage,
        })
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

/// Build the configured completion client.
pub fn build_client(
    provider: &ProviderConfig,
    models: &ModelsConfig,
) -> Result<Arc<dyn CompletionClient>, ApiError> {
    provider
        .validate()
        .map_err(ApiError::ProviderNotConfigured)?;
    Ok(Arc::new(OpenAICompatibleClient::new(
        provider,
        models.clone(),
    )?))
}
