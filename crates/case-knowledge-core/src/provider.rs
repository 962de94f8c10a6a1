//! Contracts for the AI services the pipeline consumes.
//!
//! Each service is an opaque collaborator behind a trait so the engines
//! can be driven by HTTP clients in production and scripted fakes in
//! tests. Implementations must be stateless per request and shareable
//! across tasks.

use anyhow::Result;
use async_trait::async_trait;

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes an audio file to plain text.
    async fn transcribe(&self, filename: &str, mime_type: &str, audio: &[u8]) -> Result<String>;
}

/// Image captioning.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Describes an image, guided by `prompt`.
    async fn caption(&self, prompt: &str, mime_type: &str, image: &[u8]) -> Result<String>;
}

/// A single chat-completion exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Chat completion, used for transcript cleaning, task extraction and
/// answering queries.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
