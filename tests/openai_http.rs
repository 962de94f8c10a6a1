//! OpenAI-compatible clients against a mock HTTP server: request shape,
//! response decoding and the retry policy.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use case_knowledge::config::EmbeddingConfig;
use case_knowledge::embedding::{EmbeddingGateway, OpenAIProvider};
use case_knowledge::http::RetryPolicy;
use case_knowledge::openai::{ChatCompleter, OpenAIClient, OpenAITranscriber, VisionCaptioner};
use case_knowledge::services::Services;
use case_knowledge_core::blob::InMemoryBlobStore;
use case_knowledge_core::models::UploadedFile;
use case_knowledge_core::provider::{Captioner, Completer, CompletionRequest, Transcriber};
use case_knowledge_core::registry::memory::InMemoryCaseRegistry;
use case_knowledge_core::store::memory::InMemoryKnowledgeStore;

use common::{collaborators, test_config, ScriptedCompleter};

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries).with_base_delay(Duration::from_millis(5))
}

fn client(server: &MockServer, max_retries: u32) -> OpenAIClient {
    OpenAIClient::new(
        &server.uri(),
        "test-key",
        Duration::from_secs(5),
        fast_retry(max_retries),
    )
    .unwrap()
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    })
}

#[tokio::test]
async fn chat_completion_sends_messages_and_reads_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "max_tokens": 1000,
            "messages": [
                { "role": "system", "content": "Be brief." },
                { "role": "user", "content": "Is the crane certified?" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("  Yes [Source 1].  ")))
        .expect(1)
        .mount(&server)
        .await;

    let completer = ChatCompleter::new(client(&server, 0), "gpt-4o-mini");
    let request = CompletionRequest::new("Be brief.", "Is the crane certified?")
        .with_temperature(0.3)
        .with_max_tokens(1000);
    let answer = completer.complete(&request).await.unwrap();
    assert_eq!(answer, "Yes [Source 1].");
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let completer = ChatCompleter::new(client(&server, 3), "gpt-4o-mini");
    let answer = completer
        .complete(&CompletionRequest::new("s", "u"))
        .await
        .unwrap();
    assert_eq!(answer, "recovered");
}

#[tokio::test]
async fn rate_limit_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(3)
        .mount(&server)
        .await;

    let completer = ChatCompleter::new(client(&server, 2), "gpt-4o-mini");
    let err = completer
        .complete(&CompletionRequest::new("s", "u"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("429"));
}

#[tokio::test]
async fn client_errors_fail_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .expect(1)
        .mount(&server)
        .await;

    let completer = ChatCompleter::new(client(&server, 5), "no-such-model");
    let err = completer
        .complete(&CompletionRequest::new("s", "u"))
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("400"));
    assert!(message.contains("bad model"));
}

#[tokio::test]
async fn malformed_completion_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let completer = ChatCompleter::new(client(&server, 0), "gpt-4o-mini");
    let err = completer
        .complete(&CompletionRequest::new("s", "u"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("choices[0].message.content"));
}

#[tokio::test]
async fn transcription_uploads_multipart_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": " Ladder cracked. " })))
        .expect(1)
        .mount(&server)
        .await;

    let transcriber = OpenAITranscriber::new(client(&server, 0), "whisper-1");
    let text = transcriber
        .transcribe("memo.m4a", "audio/mp4", b"fake-audio")
        .await
        .unwrap();
    assert_eq!(text, "Ladder cracked.");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("filename=\"memo.m4a\""));
    assert!(body.contains("whisper-1"));
    assert!(body.contains("fake-audio"));
}

#[tokio::test]
async fn transcription_multipart_is_rebuilt_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "second try" })))
        .mount(&server)
        .await;

    let transcriber = OpenAITranscriber::new(client(&server, 1), "whisper-1");
    let text = transcriber
        .transcribe("memo.wav", "audio/wav", b"pcm")
        .await
        .unwrap();
    assert_eq!(text, "second try");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(String::from_utf8_lossy(&requests[1].body).contains("pcm"));
}

#[tokio::test]
async fn caption_inlines_image_as_data_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "gpt-4o", "max_tokens": 300 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("Open trench, no barrier.")))
        .expect(1)
        .mount(&server)
        .await;

    let captioner = VisionCaptioner::new(client(&server, 0), "gpt-4o", 300);
    let caption = captioner
        .caption("Describe the hazards.", "image/png", b"abc")
        .await
        .unwrap();
    assert_eq!(caption, "Open trench, no barrier.");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let parts = &body["messages"][0]["content"];
    assert_eq!(parts[0]["text"], "Describe the hazards.");
    assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,YWJj");
}

#[tokio::test]
async fn retried_caption_completes_within_ingestion_deadline() {
    let server = MockServer::start().await;
    // First attempt outlives the 1s request timeout; the retry answers at once.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_reply("too late"))
                .set_delay(Duration::from_millis(1500)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("Crane outrigger on soft ground.")))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.completion.timeout_secs = 1;
    config.completion.max_retries = 1;

    let http = OpenAIClient::new(
        &server.uri(),
        "test-key",
        Duration::from_secs(config.completion.timeout_secs),
        fast_retry(config.completion.max_retries),
    )
    .unwrap();
    let mut ai = collaborators(Arc::new(ScriptedCompleter::new("[]")), 64);
    ai.captioner = Arc::new(VisionCaptioner::new(http, "gpt-4o", 300));
    let services = Services::assemble(
        &config,
        Arc::new(InMemoryCaseRegistry::new()),
        Arc::new(InMemoryKnowledgeStore::new()),
        Arc::new(InMemoryBlobStore::new("construction_files")),
        ai,
    );

    let creation = services
        .lifecycle
        .create_case(vec![], vec![], vec![UploadedFile::new("crane.jpg", vec![1, 2, 3])])
        .await
        .unwrap();
    assert!(creation.images[0].is_success(), "{:?}", creation.images);
}

fn embedding_config(server: &MockServer, dims: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("text-embedding-3-small".to_string()),
        dims: Some(dims),
        url: Some(server.uri()),
        batch_size: 2,
        max_retries: 0,
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn embeddings_are_ordered_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({ "model": "text-embedding-3-small" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0, 0.0] },
                { "index": 0, "embedding": [1.0, 0.0, 0.0] }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config(&server, 3), "test-key").unwrap();
    let gateway = EmbeddingGateway::new(Arc::new(provider), 2, Duration::from_secs(5));
    let vectors = gateway
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
}

#[tokio::test]
async fn gateway_rejects_vectors_of_the_wrong_dimension() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [1.0, 0.0] }]
        })))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::with_api_key(&embedding_config(&server, 3), "test-key")
        .unwrap()
        .with_retry(fast_retry(0));
    let gateway = EmbeddingGateway::new(Arc::new(provider), 2, Duration::from_secs(5));
    let err = gateway.embed("ladder").await.unwrap_err();
    assert_eq!(err.kind(), "embedding_error");
}
