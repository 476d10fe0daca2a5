//! OpenAI-compatible generation backend implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use quiver_core::{defaults, Error, GenerationBackend, GenerationParams, Result, TokenStream};

use super::error::{to_quiver_error, OpenAIErrorCode};
use super::streaming::parse_sse_stream;
use super::types::*;

/// Configuration for OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for generation.
    pub gen_model: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::LLM_URL.to_string(),
            api_key: None,
            gen_model: defaults::GEN_MODEL.to_string(),
            timeout_seconds: defaults::GEN_TIMEOUT_SECS,
        }
    }
}

impl OpenAIConfig {
    /// Read `OPENAI_BASE_URL`, `OPENAI_API_KEY`, `OPENAI_GEN_MODEL`, `OPENAI_TIMEOUT`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(d.base_url),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            gen_model: std::env::var("OPENAI_GEN_MODEL").unwrap_or(d.gen_model),
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.timeout_seconds),
        }
    }
}

/// Chat-completions backend for OpenAI, Ollama, vLLM and compatible servers.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            op = "init",
            url = %config.base_url,
            model = %config.gen_model,
            "Initializing OpenAI-compatible backend"
        );
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build a request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }
        req.header("Content-Type", "application/json")
    }

    fn chat_request(
        &self,
        system: &str,
        prompt: &str,
        params: GenerationParams,
        stream: bool,
    ) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream,
        }
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let response = self
            .build_request("/chat/completions")
            .json(request)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: OpenAIErrorResponse = response
            .json()
            .await
            .unwrap_or_else(|_| OpenAIErrorResponse::unknown());
        let code = OpenAIErrorCode::from_response(status.as_u16(), &body.error.error_type);
        Err(to_quiver_error(
            code,
            &format!("{} returned {}: {}", self.config.base_url, status, body.error.message),
        ))
    }
}

fn send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("Generation request timed out: {}", e))
    } else if e.is_connect() {
        Error::Transient(format!("Generation endpoint unreachable: {}", e))
    } else {
        Error::Inference(format!("Request failed: {}", e))
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "openai", op = "generate", prompt_len = prompt.len()))]
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String> {
        let start = Instant::now();
        let request = self.chat_request(system, prompt, params, false);
        let response = self.send(&request).await?;

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedOutput(format!("Failed to parse response: {}", e)))?;
        let content = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms > defaults::SLOW_CALL_MS {
            warn!(
                model = %self.config.gen_model,
                response_len = content.len(),
                duration_ms,
                slow = true,
                "Slow generation"
            );
        } else {
            debug!(response_len = content.len(), duration_ms, "Generation complete");
        }
        Ok(content)
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "openai", op = "generate_stream", prompt_len = prompt.len()))]
    async fn generate_stream(
        &self,
        system: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<TokenStream> {
        let request = self.chat_request(system, prompt, params, true);
        let response = self.send(&request).await?;
        debug!(model = %self.config.gen_model, "Streaming generation started");
        Ok(parse_sse_stream(response.bytes_stream()))
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}
