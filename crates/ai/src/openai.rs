//! OpenAI-compatible HTTP client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::client::{
    AiClient, AiError, CallMetrics, ChatRequest, ChatResponse, ImageRequest, ImageResponse,
    ModerationResponse,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    /// Connection-level timeout applied to every request.
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Reqwest-backed client for an OpenAI-compatible provider.
///
/// Performs no retries of its own; `colorforge-retry` wraps every call site.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, AiError> {
        if config.api_key.is_empty() {
            return Err(AiError::Config("api key must not be empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, AiError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            // Provider error bodies are short diagnostics, safe to surface.
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Status { status: status.as_u16(), message });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> AiError {
    if err.is_timeout() {
        AiError::Timeout
    } else if let Some(status) = err.status() {
        AiError::Status { status: status.as_u16(), message: err.to_string() }
    } else {
        AiError::Transport(err.to_string())
    }
}

/// Rough per-million-token USD rates, for spend tracking only.
fn estimate_text_cost(tokens: u32, model: &str) -> f64 {
    let rate = match model {
        "gpt-4o" => 2.5,
        "gpt-4" => 30.0,
        _ => 0.15,
    };
    (tokens as f64 / 1_000_000.0) * rate
}

fn estimate_image_cost(model: &str) -> f64 {
    match model {
        "dall-e-3" => 0.04,
        _ => 0.02,
    }
}

#[derive(Deserialize)]
struct ChatCompletionBody {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ImageGenerationBody {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Deserialize)]
struct ModerationBody {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    category_scores: std::collections::BTreeMap<String, f64>,
}

#[async_trait]
impl AiClient for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AiError> {
        let started = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body: ChatCompletionBody = self
            .post_json(
                "chat/completions",
                json!({
                    "model": self.config.text_model,
                    "messages": messages,
                    "max_tokens": request.max_tokens,
                    "temperature": request.temperature,
                    "response_format": {"type": "json_object"},
                }),
            )
            .await?;

        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| AiError::InvalidResponse("empty completion".to_string()))?;

        let tokens = body.usage.map(|u| u.total_tokens);
        let metrics = CallMetrics {
            latency_ms: started.elapsed().as_millis() as u64,
            tokens,
            cost_usd: tokens.map(|t| estimate_text_cost(t, &self.config.text_model)),
        };
        debug!(latency_ms = metrics.latency_ms, tokens = ?metrics.tokens, "chat completion");

        Ok(ChatResponse { content, metrics })
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse, AiError> {
        let started = Instant::now();

        let body: ImageGenerationBody = self
            .post_json(
                "images/generations",
                json!({
                    "model": self.config.image_model,
                    "prompt": request.prompt,
                    "n": 1,
                    "size": request.size.as_str(),
                    "quality": request.quality.as_str(),
                    "response_format": "b64_json",
                }),
            )
            .await?;

        let b64_png = body
            .data
            .first()
            .and_then(|d| d.b64_json.clone())
            .ok_or_else(|| AiError::InvalidResponse("empty image payload".to_string()))?;

        let metrics = CallMetrics {
            latency_ms: started.elapsed().as_millis() as u64,
            tokens: None,
            cost_usd: Some(estimate_image_cost(&self.config.image_model)),
        };
        debug!(latency_ms = metrics.latency_ms, "image generation");

        Ok(ImageResponse { b64_png, metrics })
    }

    async fn moderate(&self, text: &str) -> Result<ModerationResponse, AiError> {
        let started = Instant::now();

        let body: ModerationBody =
            self.post_json("moderations", json!({"input": text})).await?;

        let result = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AiError::InvalidResponse("empty moderation result".to_string()))?;

        let metrics = CallMetrics {
            latency_ms: started.elapsed().as_millis() as u64,
            tokens: None,
            cost_usd: None,
        };
        debug!(latency_ms = metrics.latency_ms, flagged = result.flagged, "moderation");

        Ok(ModerationResponse {
            flagged: result.flagged,
            category_scores: result.category_scores,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let client =
            OpenAiClient::new(OpenAiConfig::new("key").with_base_url("https://api.test/v1/"))
                .unwrap();
        assert_eq!(client.url("moderations"), "https://api.test/v1/moderations");
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(OpenAiClient::new(OpenAiConfig::new("")).is_err());
    }

    #[test]
    fn cost_estimates_scale_with_tokens() {
        assert!(estimate_text_cost(1_000_000, "gpt-4o-mini") - 0.15 < f64::EPSILON);
        assert!(estimate_text_cost(0, "gpt-4o-mini") < f64::EPSILON);
        assert!(estimate_image_cost("dall-e-3") > estimate_image_cost("dall-e-2"));
    }
}
