//! Scripted AI client for tests/dev.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::client::{
    AiClient, AiError, CallMetrics, ChatRequest, ChatResponse, ImageRequest, ImageResponse,
    ModerationResponse,
};

/// A minimal valid 1x1 PNG, used as the default generated image.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // signature
    0x00, 0x00, 0x00, 0x0D, // IHDR length
    0x49, 0x48, 0x44, 0x52, // IHDR
    0x00, 0x00, 0x00, 0x01, // width: 1
    0x00, 0x00, 0x00, 0x01, // height: 1
    0x08, 0x02, // bit depth, color type (RGB)
    0x00, 0x00, 0x00, // compression, filter, interlace
    0x90, 0x77, 0x53, 0xDE, // CRC
    0x00, 0x00, 0x00, 0x0C, // IDAT length
    0x49, 0x44, 0x41, 0x54, // IDAT
    0x08, 0xD7, 0x63, 0xF8, 0xFF, 0xFF, 0x3F, 0x00, 0x05, 0xFE, 0x02, 0xFE, // data
    0xDC, 0xDD, 0xB4, 0x19, // CRC
    0x00, 0x00, 0x00, 0x00, // IEND length
    0x49, 0x45, 0x4E, 0x44, // IEND
    0xAE, 0x42, 0x60, 0x82, // CRC
];

const CANNED_PL: &str = r#"{
  "title": "Wesoly lew na sawannie do kolorowania",
  "description": "Przyjazny lew odpoczywa pod drzewem akacji na rozleglej sawannie. Proste, wyrazne kontury sprawiaja, ze obrazek jest latwy do pokolorowania nawet dla najmlodszych dzieci.",
  "keywords": ["lew", "sawanna", "zwierzeta"],
  "meta_title": "Lew na sawannie - kolorowanka",
  "meta_description": "Wydrukuj i pokoloruj wesolego lwa na sawannie."
}"#;

const CANNED_EN: &str = r#"{
  "title": "Cheerful lion on the savanna to color",
  "description": "A friendly lion rests under an acacia tree on the wide savanna, drawn with bold simple outlines that are easy for small hands to color in.",
  "keywords": ["lion", "savanna", "animals"],
  "meta_title": "Lion on the savanna coloring page",
  "meta_description": "Print and color a cheerful lion on the savanna."
}"#;

/// Scripted [`AiClient`] for tests.
///
/// Responses pushed with `push_*` are consumed FIFO; once a queue drains the
/// mock falls back to canned, validation-passing defaults (locale inferred
/// from the prompt text, image = [`PLACEHOLDER_PNG`], moderation = clean).
#[derive(Debug, Default)]
pub struct MockAiClient {
    chat: Mutex<VecDeque<Result<String, AiError>>>,
    images: Mutex<VecDeque<Result<Vec<u8>, AiError>>>,
    moderations: Mutex<VecDeque<Result<bool, AiError>>>,
    chat_calls: AtomicU32,
    image_calls: AtomicU32,
    moderation_calls: AtomicU32,
}

impl MockAiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, result: Result<String, AiError>) {
        self.chat.lock().unwrap().push_back(result);
    }

    pub fn push_image(&self, result: Result<Vec<u8>, AiError>) {
        self.images.lock().unwrap().push_back(result);
    }

    pub fn push_moderation(&self, result: Result<bool, AiError>) {
        self.moderations.lock().unwrap().push_back(result);
    }

    pub fn chat_calls(&self) -> u32 {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> u32 {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn moderation_calls(&self) -> u32 {
        self.moderation_calls.load(Ordering::SeqCst)
    }
}

fn metrics() -> CallMetrics {
    CallMetrics { latency_ms: 1, tokens: Some(100), cost_usd: Some(0.0) }
}

#[async_trait]
impl AiClient for MockAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AiError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.chat.lock().unwrap().pop_front() {
            return scripted.map(|content| ChatResponse { content, metrics: metrics() });
        }
        // "in Polish" targets the requested output language, not incidental
        // mentions of the site being Polish.
        let content = if request.prompt.contains("in Polish") {
            CANNED_PL
        } else {
            CANNED_EN
        };
        Ok(ChatResponse { content: content.to_string(), metrics: metrics() })
    }

    async fn generate_image(&self, _request: ImageRequest) -> Result<ImageResponse, AiError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let bytes = match self.images.lock().unwrap().pop_front() {
            Some(scripted) => scripted?,
            None => PLACEHOLDER_PNG.to_vec(),
        };
        Ok(ImageResponse { b64_png: BASE64.encode(bytes), metrics: metrics() })
    }

    async fn moderate(&self, _text: &str) -> Result<ModerationResponse, AiError> {
        self.moderation_calls.fetch_add(1, Ordering::SeqCst);
        let flagged = match self.moderations.lock().unwrap().pop_front() {
            Some(scripted) => scripted?,
            None => false,
        };
        Ok(ModerationResponse {
            flagged,
            category_scores: BTreeMap::new(),
            metrics: metrics(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_are_consumed_in_order() {
        let mock = MockAiClient::new();
        mock.push_moderation(Ok(true));
        mock.push_moderation(Err(AiError::Timeout));

        assert!(mock.moderate("text").await.unwrap().flagged);
        assert!(matches!(mock.moderate("text").await, Err(AiError::Timeout)));
        // Drained queue falls back to a clean verdict.
        assert!(!mock.moderate("text").await.unwrap().flagged);
        assert_eq!(mock.moderation_calls(), 3);
    }

    #[tokio::test]
    async fn canned_chat_depends_on_prompt_language() {
        let mock = MockAiClient::new();
        let pl = mock.chat(ChatRequest::new("Write in Polish please")).await.unwrap();
        let en = mock.chat(ChatRequest::new("Write in English please")).await.unwrap();
        assert_ne!(pl.content, en.content);
    }

    #[tokio::test]
    async fn default_image_is_a_png() {
        let mock = MockAiClient::new();
        let response = mock
            .generate_image(ImageRequest::standard("a lion"))
            .await
            .unwrap();
        let bytes = BASE64.decode(response.b64_png).unwrap();
        assert_eq!(&bytes[..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
    }
}
