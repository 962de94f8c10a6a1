//! OpenAI-compatible AI collaborators.
//!
//! One [`OpenAIClient`] (HTTP client, base URL, key, retry policy) is
//! built per process and shared by:
//!
//! - [`ChatCompleter`]: `POST /chat/completions`, used for transcript
//!   cleaning, task extraction and answering queries.
//! - [`OpenAITranscriber`]: `POST /audio/transcriptions` (multipart).
//! - [`VisionCaptioner`]: `POST /chat/completions` with the image inlined
//!   as a base64 data URL.
//!
//! All requests go through [`send_json_with_retry`].

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart;
use serde_json::{json, Value};

use case_knowledge_core::provider::{Captioner, Completer, CompletionRequest, Transcriber};

use crate::config::CompletionConfig;
use crate::http::{send_json_with_retry, RetryPolicy};

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAIClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry,
        })
    }

    /// Builds a client from `[completion]`, reading `OPENAI_API_KEY`.
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::new(
            &config.base_url,
            api_key,
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::new(config.max_retries),
        )
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        send_json_with_retry("OpenAI", self.retry, || {
            self.http.post(&url).bearer_auth(&self.api_key).json(body)
        })
        .await
    }
}

/// Pulls `choices[0].message.content` out of a chat completion.
fn message_content(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

pub struct ChatCompleter {
    client: OpenAIClient,
    model: String,
}

impl ChatCompleter {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Completer for ChatCompleter {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        let json = self.client.post_json("/chat/completions", &body).await?;
        message_content(&json)
    }
}

pub struct OpenAITranscriber {
    client: OpenAIClient,
    model: String,
}

impl OpenAITranscriber {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Transcriber for OpenAITranscriber {
    async fn transcribe(&self, filename: &str, mime_type: &str, audio: &[u8]) -> Result<String> {
        let url = format!("{}/audio/transcriptions", self.client.base_url);
        let client = &self.client;
        let response = crate::http::send_with_retry("OpenAI", client.retry, || {
            let file = multipart::Part::bytes(audio.to_vec()).file_name(filename.to_string());
            let file = match file.mime_str(mime_type) {
                Ok(part) => part,
                Err(_) => multipart::Part::bytes(audio.to_vec()).file_name(filename.to_string()),
            };
            let form = multipart::Form::new()
                .text("model", self.model.clone())
                .part("file", file);
            client
                .http
                .post(&url)
                .bearer_auth(&client.api_key)
                .multipart(form)
        })
        .await?;
        let json: Value = response.json().await?;
        json.get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing transcription text"))
    }
}

pub struct VisionCaptioner {
    client: OpenAIClient,
    model: String,
    max_tokens: u32,
}

impl VisionCaptioner {
    pub fn new(client: OpenAIClient, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }
}

/// `data:{mime};base64,{payload}` for inlining an image in a request.
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[async_trait]
impl Captioner for VisionCaptioner {
    async fn caption(&self, prompt: &str, mime_type: &str, image: &[u8]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url(mime_type, image) } },
                ],
            }],
        });
        let json = self.client.post_json("/chat/completions", &body).await?;
        message_content(&json)
    }
}
