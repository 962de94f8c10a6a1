//! Service wiring.
//!
//! Every client handle is built once here and passed down explicitly;
//! engines never construct their own collaborators. [`Services::open`]
//! builds the production graph from config. Tests use
//! [`Services::assemble`] with in-memory stores and scripted AI fakes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use case_knowledge_core::blob::BlobStore;
use case_knowledge_core::embedding::EmbeddingProvider;
use case_knowledge_core::provider::{Captioner, Completer, CompletionRequest, Transcriber};
use case_knowledge_core::registry::CaseRegistry;
use case_knowledge_core::store::KnowledgeStore;

use crate::blob_fs::FsBlobStore;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingGateway};
use crate::http::RetryPolicy;
use crate::lifecycle::LifecycleCoordinator;
use crate::normalize::Normalizer;
use crate::openai::{ChatCompleter, OpenAIClient, OpenAITranscriber, VisionCaptioner};
use crate::query::QueryRouter;
use crate::retrieval::RetrievalEngine;
use crate::sqlite_registry::SqliteCaseRegistry;
use crate::sqlite_store::SqliteKnowledgeStore;
use crate::task_engine::TaskEngine;

/// The AI services the pipeline consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub transcriber: Arc<dyn Transcriber>,
    pub captioner: Arc<dyn Captioner>,
    /// Task extraction and query answering.
    pub completer: Arc<dyn Completer>,
    /// Transcript cleaning.
    pub cleaner: Arc<dyn Completer>,
}

impl Collaborators {
    /// OpenAI-backed collaborators plus the configured embedding provider.
    ///
    /// Without `OPENAI_API_KEY` the AI collaborators are replaced by
    /// [`Unavailable`], so commands that never call them still work.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let completion = &config.completion;

        match OpenAIClient::from_config(completion) {
            Ok(client) => Ok(Self {
                embedder,
                transcriber: Arc::new(OpenAITranscriber::new(
                    client.clone(),
                    &completion.transcription_model,
                )),
                captioner: Arc::new(VisionCaptioner::new(
                    client.clone(),
                    &completion.caption_model,
                    completion.max_tokens,
                )),
                completer: Arc::new(ChatCompleter::new(client.clone(), &completion.model)),
                cleaner: Arc::new(ChatCompleter::new(client, &completion.clean_model)),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "AI collaborators unavailable");
                let unavailable = Arc::new(Unavailable(format!("{:#}", e)));
                Ok(Self {
                    embedder,
                    transcriber: unavailable.clone(),
                    captioner: unavailable.clone(),
                    completer: unavailable.clone(),
                    cleaner: unavailable,
                })
            }
        }
    }
}

/// Stand-in for an AI collaborator that could not be configured. Every
/// call fails with the configuration error.
pub struct Unavailable(pub String);

#[async_trait]
impl Transcriber for Unavailable {
    async fn transcribe(&self, _filename: &str, _mime_type: &str, _audio: &[u8]) -> Result<String> {
        bail!("transcription unavailable: {}", self.0)
    }
}

#[async_trait]
impl Captioner for Unavailable {
    async fn caption(&self, _prompt: &str, _mime_type: &str, _image: &[u8]) -> Result<String> {
        bail!("captioning unavailable: {}", self.0)
    }
}

#[async_trait]
impl Completer for Unavailable {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        bail!("completion unavailable: {}", self.0)
    }
}

pub struct Services {
    pub registry: Arc<dyn CaseRegistry>,
    pub store: Arc<dyn KnowledgeStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub gateway: EmbeddingGateway,
    pub retrieval: Arc<RetrievalEngine>,
    pub tasks: Arc<TaskEngine>,
    pub lifecycle: LifecycleCoordinator,
    pub queries: QueryRouter,
}

impl Services {
    /// Opens the SQLite database and object storage named in `config` and
    /// pins the embedding model on the index.
    ///
    /// The schema must already exist (`casekb init`).
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store = SqliteKnowledgeStore::new(pool.clone());
        let collaborators = Collaborators::from_config(config)?;
        store
            .pin_model(collaborators.embedder.model_name(), collaborators.embedder.dims())
            .await
            .context("Failed to pin embedding model (has `casekb init` been run?)")?;

        Ok(Self::assemble(
            config,
            Arc::new(SqliteCaseRegistry::new(pool)),
            Arc::new(store),
            Arc::new(FsBlobStore::from_config(&config.storage)),
            collaborators,
        ))
    }

    /// Wires the engines over the given stores and collaborators.
    pub fn assemble(
        config: &Config,
        registry: Arc<dyn CaseRegistry>,
        store: Arc<dyn KnowledgeStore>,
        blobs: Arc<dyn BlobStore>,
        collaborators: Collaborators,
    ) -> Self {
        let store_timeout = Duration::from_secs(config.ingest.store_timeout_secs);
        // AI calls retry inside the client, so their deadline spans every attempt.
        let ai_timeout = RetryPolicy::new(config.completion.max_retries)
            .deadline(Duration::from_secs(config.completion.timeout_secs));
        let gateway = EmbeddingGateway::from_config(collaborators.embedder.clone(), &config.embedding);

        let normalizer = Arc::new(Normalizer::new(
            collaborators.transcriber,
            collaborators.cleaner,
            collaborators.captioner,
            config.chunking.max_tokens,
            ai_timeout,
        ));
        let retrieval = Arc::new(RetrievalEngine::new(
            gateway.clone(),
            store.clone(),
            collaborators.completer.clone(),
            config.retrieval.top_k,
            store_timeout,
            ai_timeout,
        ));
        let tasks = Arc::new(TaskEngine::new(
            store.clone(),
            registry.clone(),
            collaborators.completer,
            gateway.clone(),
            config.completion.temperature,
            config.completion.max_tokens,
            store_timeout,
            ai_timeout,
        ));
        let lifecycle = LifecycleCoordinator::new(
            normalizer,
            gateway.clone(),
            store.clone(),
            registry.clone(),
            blobs.clone(),
            tasks.clone(),
            config.ingest.max_concurrent_files,
            store_timeout,
        );
        let queries = QueryRouter::new(registry.clone(), store.clone(), retrieval.clone(), store_timeout);

        Self {
            registry,
            store,
            blobs,
            gateway,
            retrieval,
            tasks,
            lifecycle,
            queries,
        }
    }
}
