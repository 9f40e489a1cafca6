//! Provider-agnostic client trait and call types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use colorforge_retry::{Retryable, is_retryable_status};

/// Per-call metrics, safe to log and persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMetrics {
    pub latency_ms: u64,
    /// Total tokens consumed (text calls only).
    pub tokens: Option<u32>,
    /// Rough cost estimate in USD.
    pub cost_usd: Option<f64>,
}

/// Structured text completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// JSON content returned by the provider plus usage metrics.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub metrics: CallMetrics,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageSize {
    Square1024,
    Wide1792,
    Tall1792,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Square1024 => "1024x1024",
            ImageSize::Wide1792 => "1792x1024",
            ImageSize::Tall1792 => "1024x1792",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageQuality {
    Standard,
    Hd,
}

impl ImageQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageQuality::Standard => "standard",
            ImageQuality::Hd => "hd",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: ImageSize,
    pub quality: ImageQuality,
}

impl ImageRequest {
    /// Fixed resolution/quality used by the pipeline to keep cost flat.
    pub fn standard(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: ImageSize::Square1024,
            quality: ImageQuality::Standard,
        }
    }
}

/// Base64-encoded image plus metrics.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub b64_png: String,
    pub metrics: CallMetrics,
}

/// Moderation verdict plus metrics. No input text is echoed back.
#[derive(Debug, Clone)]
pub struct ModerationResponse {
    pub flagged: bool,
    pub category_scores: BTreeMap<String, f64>,
    pub metrics: CallMetrics,
}

/// Provider call failure.
///
/// Carries the HTTP status where one exists so the retry layer can decide
/// between transient (429/5xx) and fatal (4xx) without this crate owning any
/// retry logic.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("client configuration error: {0}")]
    Config(String),

    #[error("generation is administratively disabled")]
    Disabled,
}

impl Retryable for AiError {
    fn is_retryable(&self) -> bool {
        match self {
            AiError::Timeout | AiError::Transport(_) => true,
            AiError::Status { status, .. } => is_retryable_status(*status),
            AiError::InvalidResponse(_) | AiError::Config(_) | AiError::Disabled => false,
        }
    }
}

/// The three provider operations the pipeline consumes.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Structured text completion; the response content is a JSON string.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AiError>;

    /// Generate a single image, returned base64-encoded.
    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse, AiError>;

    /// Moderate text. Only flags and scores come back, never the input.
    async fn moderate(&self, text: &str) -> Result<ModerationResponse, AiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification_follows_status() {
        assert!(AiError::Timeout.is_retryable());
        assert!(AiError::Transport("connection refused".into()).is_retryable());
        assert!(AiError::Status { status: 429, message: String::new() }.is_retryable());
        assert!(AiError::Status { status: 500, message: String::new() }.is_retryable());
        assert!(!AiError::Status { status: 400, message: String::new() }.is_retryable());
        assert!(!AiError::InvalidResponse("bad json".into()).is_retryable());
        assert!(!AiError::Disabled.is_retryable());
    }
}
