//! `colorforge-ai` — AI provider client wrapper.
//!
//! Thin, retry-free clients for the three provider operations the pipeline
//! needs: structured text completion, image generation, and moderation.
//! Every call reports latency/usage metrics; raw prompt or response content
//! never reaches the logs. Retry policy is layered on top by callers via
//! `colorforge-retry`.

pub mod client;
pub mod mock;
pub mod openai;

pub use client::{
    AiClient, AiError, CallMetrics, ChatRequest, ChatResponse, ImageQuality, ImageRequest,
    ImageResponse, ImageSize, ModerationResponse,
};
pub use mock::MockAiClient;
pub use openai::{OpenAiClient, OpenAiConfig};
