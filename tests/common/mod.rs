//! Shared fixtures for the integration tests: scripted AI collaborators
//! and service graphs over in-memory or SQLite stores.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use case_knowledge::config::Config;
use case_knowledge::normalize::CLEAN_INSTRUCTION;
use case_knowledge::services::{Collaborators, Services};
use case_knowledge_core::blob::InMemoryBlobStore;
use case_knowledge_core::context::ANSWER_SYSTEM_PROMPT;
use case_knowledge_core::embedding::HashingEmbedder;
use case_knowledge_core::provider::{Captioner, Completer, CompletionRequest, Transcriber};
use case_knowledge_core::registry::memory::InMemoryCaseRegistry;
use case_knowledge_core::store::memory::InMemoryKnowledgeStore;
use case_knowledge_core::tasks::TASK_SYSTEM_PROMPT;

pub const TWO_TASKS: &str = r#"```json
{"tasks": [
  {"title": "Shore the trench", "description": "Install trench boxes before work resumes", "priority": "high", "category": "safety", "reasoning": "Collapse risk"},
  {"title": "Photograph rebar", "description": "Document exposed rebar at C4", "priority": "medium", "category": "documentation", "reasoning": "Record for the engineer"}
]}
```"#;

/// Completer that answers by system prompt and counts calls per kind.
///
/// - cleaning: returns the transcript unchanged
/// - task extraction: returns `task_reply`
/// - answering: returns `answer_reply`
pub struct ScriptedCompleter {
    pub task_reply: Mutex<String>,
    pub answer_reply: String,
    pub clean_calls: AtomicUsize,
    pub task_calls: AtomicUsize,
    pub answer_calls: AtomicUsize,
    pub fail_tasks: Mutex<bool>,
    pub last_answer_request: Mutex<Option<CompletionRequest>>,
    pub last_task_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedCompleter {
    pub fn new(task_reply: &str) -> Self {
        Self {
            task_reply: Mutex::new(task_reply.to_string()),
            answer_reply: "Rebar was exposed at column C4 [Source 1].".to_string(),
            clean_calls: AtomicUsize::new(0),
            task_calls: AtomicUsize::new(0),
            answer_calls: AtomicUsize::new(0),
            fail_tasks: Mutex::new(false),
            last_answer_request: Mutex::new(None),
            last_task_request: Mutex::new(None),
        }
    }

    pub fn task_calls(&self) -> usize {
        self.task_calls.load(Ordering::SeqCst)
    }

    pub fn answer_calls(&self) -> usize {
        self.answer_calls.load(Ordering::SeqCst)
    }

    pub fn clean_calls(&self) -> usize {
        self.clean_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if request.system == CLEAN_INSTRUCTION {
            self.clean_calls.fetch_add(1, Ordering::SeqCst);
            Ok(request.user.clone())
        } else if request.system == TASK_SYSTEM_PROMPT {
            self.task_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_task_request.lock().unwrap() = Some(request.clone());
            if *self.fail_tasks.lock().unwrap() {
                bail!("completion service returned 503");
            }
            Ok(self.task_reply.lock().unwrap().clone())
        } else if request.system == ANSWER_SYSTEM_PROMPT {
            self.answer_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_answer_request.lock().unwrap() = Some(request.clone());
            Ok(self.answer_reply.clone())
        } else {
            bail!("unexpected system prompt: {}", request.system)
        }
    }
}

/// Transcribes every file to the same text unless its name contains
/// "corrupt".
pub struct ScriptedTranscriber(pub &'static str);

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, filename: &str, _mime_type: &str, _audio: &[u8]) -> Result<String> {
        if filename.contains("corrupt") {
            bail!("unsupported audio encoding");
        }
        Ok(self.0.to_string())
    }
}

/// Captions every image with the same text unless its name contains
/// "corrupt".
pub struct ScriptedCaptioner(pub &'static str);

#[async_trait]
impl Captioner for ScriptedCaptioner {
    async fn caption(&self, _prompt: &str, _mime_type: &str, image: &[u8]) -> Result<String> {
        if image.is_empty() {
            bail!("image is empty");
        }
        Ok(self.0.to_string())
    }
}

pub const AUDIO_TEXT: &str = "The ladder on level three is cracked and must be replaced.";
pub const IMAGE_TEXT: &str = "Scaffolding on the west facade without guardrails.";

/// Offline config with small chunks: two short paragraphs become two
/// chunks.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::offline(dir);
    config.chunking.max_tokens = 10;
    config.ingest.store_timeout_secs = 5;
    config.completion.timeout_secs = 5;
    config
}

pub fn collaborators(completer: Arc<ScriptedCompleter>, dims: usize) -> Collaborators {
    Collaborators {
        embedder: Arc::new(HashingEmbedder::new(dims)),
        transcriber: Arc::new(ScriptedTranscriber(AUDIO_TEXT)),
        captioner: Arc::new(ScriptedCaptioner(IMAGE_TEXT)),
        completer: completer.clone(),
        cleaner: completer,
    }
}

/// Services over in-memory stores, with handles to the concrete stores.
pub struct MemoryHarness {
    pub services: Services,
    pub registry: Arc<InMemoryCaseRegistry>,
    pub store: Arc<InMemoryKnowledgeStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub completer: Arc<ScriptedCompleter>,
}

pub fn memory_harness(dir: &Path, task_reply: &str) -> MemoryHarness {
    let config = test_config(dir);
    let registry = Arc::new(InMemoryCaseRegistry::new());
    let store = Arc::new(InMemoryKnowledgeStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new("construction_files"));
    let completer = Arc::new(ScriptedCompleter::new(task_reply));
    let services = Services::assemble(
        &config,
        registry.clone(),
        store.clone(),
        blobs.clone(),
        collaborators(completer.clone(), 256),
    );
    MemoryHarness {
        services,
        registry,
        store,
        blobs,
        completer,
    }
}

pub const PARAGRAPH_ONE: &str = "Foundation concrete poured on Monday.";
pub const PARAGRAPH_TWO: &str = "Rebar exposed at column C4 north.";

pub fn two_chunk_document() -> Vec<u8> {
    format!("{}\n\n{}", PARAGRAPH_ONE, PARAGRAPH_TWO).into_bytes()
}
