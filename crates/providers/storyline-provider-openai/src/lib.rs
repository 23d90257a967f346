//! OpenAI-compatible text generation for the storyline engine
//!
//! Sends the rendered [`GenerationRequest`] prompt as a single user message and
//! returns the first choice's text. Works against any server that speaks the
//! chat completions API (set `OPENAI_BASE_URL`).

#![warn(clippy::all)]

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use storyline_core::{
    get_env_or, get_env_parsed_or, get_required_env, GenerationRequest, Result, StorylineError,
    TextGenerator,
};

/// Model used when `STORYLINE_GENERATION_MODEL` is unset
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Settings for [`OpenAiTextGenerator`]
#[derive(Debug, Clone)]
pub struct OpenAiGeneratorConfig {
    /// API key
    pub api_key: String,
    /// Alternative API base URL
    pub base_url: Option<String>,
    /// Chat model name
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Reply length cap
    pub max_tokens: u32,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl OpenAiGeneratorConfig {
    /// Read settings from the environment.
    ///
    /// `OPENAI_API_KEY` is required; `OPENAI_BASE_URL`,
    /// `STORYLINE_GENERATION_MODEL`, `STORYLINE_GENERATION_TEMPERATURE`,
    /// `STORYLINE_GENERATION_MAX_TOKENS` and `STORYLINE_GENERATION_TIMEOUT_SECS`
    /// are optional.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        Ok(Self {
            api_key: get_required_env("OPENAI_API_KEY")?,
            base_url,
            model: get_env_or("STORYLINE_GENERATION_MODEL", DEFAULT_MODEL),
            temperature: get_env_parsed_or("STORYLINE_GENERATION_TEMPERATURE", 0.8)?,
            max_tokens: get_env_parsed_or("STORYLINE_GENERATION_MAX_TOKENS", 300)?,
            request_timeout: Duration::from_secs(get_env_parsed_or(
                "STORYLINE_GENERATION_TIMEOUT_SECS",
                30,
            )?),
        })
    }
}

/// [`TextGenerator`] backed by the OpenAI chat completions API
pub struct OpenAiTextGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiTextGenerator {
    /// Build a generator from explicit settings
    pub fn new(config: OpenAiGeneratorConfig) -> Result<Self> {
        let mut openai = OpenAIConfig::new().with_api_key(config.api_key);
        if let Some(base_url) = config.base_url {
            openai = openai.with_api_base(base_url);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StorylineError::config(format!("Failed to build HTTP client: {}", e)))?;

        tracing::debug!(model = %config.model, "Initializing OpenAI text generator");
        Ok(Self {
            client: Client::with_config(openai).with_http_client(http),
            model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Build a generator from the environment
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiGeneratorConfig::from_env()?)
    }

    /// Configured model name
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let start_time = std::time::Instant::now();

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(request.to_prompt())
                    .build()
                    .map_err(|e| StorylineError::generation(e.to_string()))?,
            )])
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| StorylineError::generation(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| StorylineError::generation(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| StorylineError::generation("empty completion"))?;

        tracing::debug!(
            storyline_id = %request.storyline_id,
            model = %self.model,
            latency_ms = start_time.elapsed().as_millis() as u64,
            "Generated storyline text"
        );
        Ok(text)
    }
}
