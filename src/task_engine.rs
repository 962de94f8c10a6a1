//! Task extraction engine.
//!
//! Aggregates a case's non-task chunks, asks the completer for tasks,
//! parses the reply leniently and persists the result twice: rows in
//! the case registry (authoritative) and `task` chunks in the knowledge
//! store for semantic search.

use std::sync::Arc;
use std::time::Duration;

use case_knowledge_core::error::CaseResult;
use case_knowledge_core::models::{task_chunk_id, ContentChunk, Task};
use case_knowledge_core::provider::Completer;
use case_knowledge_core::registry::CaseRegistry;
use case_knowledge_core::store::KnowledgeStore;
use case_knowledge_core::tasks::{task_request, try_parse_tasks, CaseContent};

use crate::embedding::EmbeddingGateway;
use crate::lifecycle::provider_call;

pub struct TaskEngine {
    store: Arc<dyn KnowledgeStore>,
    registry: Arc<dyn CaseRegistry>,
    completer: Arc<dyn Completer>,
    gateway: EmbeddingGateway,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    completion_timeout: Duration,
}

impl TaskEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        registry: Arc<dyn CaseRegistry>,
        completer: Arc<dyn Completer>,
        gateway: EmbeddingGateway,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            completer,
            gateway,
            temperature,
            max_tokens,
            timeout,
            completion_timeout,
        }
    }

    /// Groups the case's indexed content by modality.
    pub async fn aggregate(&self, case_id: &str) -> CaseResult<CaseContent> {
        let chunks =
            provider_call("knowledge store", self.timeout, self.store.fetch_by_case(case_id)).await?;
        Ok(CaseContent::aggregate(&chunks))
    }

    /// Generates, stores and indexes tasks for `case_id`.
    ///
    /// Returns `[]` without calling the completer when the case has no
    /// content, and `[]` when the reply cannot be parsed.
    pub async fn generate_tasks(&self, case_id: &str) -> CaseResult<Vec<Task>> {
        let content = self.aggregate(case_id).await?;
        if content.is_empty() {
            tracing::info!(case_id, "no content to analyze; skipping task generation");
            return Ok(Vec::new());
        }

        let request = task_request(&content)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        let raw = provider_call(
            "completion",
            self.completion_timeout,
            self.completer.complete(&request),
        )
        .await?;

        let drafts = match try_parse_tasks(&raw) {
            Ok(drafts) => drafts,
            Err(e) => {
                tracing::warn!(case_id, error = %e, "task extraction output unusable");
                Vec::new()
            }
        };
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let provenance = content.all_chunk_ids();
        let tasks: Vec<Task> = drafts
            .into_iter()
            .map(|draft| Task::from_draft(draft, case_id, provenance.clone()))
            .collect();

        provider_call("case registry", self.timeout, self.registry.insert_tasks(&tasks)).await?;

        if let Err(e) = self.index_tasks(case_id, &tasks).await {
            tracing::warn!(case_id, error = %e, "tasks stored but not indexed for search");
        }

        tracing::info!(case_id, tasks = tasks.len(), "generated tasks");
        Ok(tasks)
    }

    async fn index_tasks(&self, case_id: &str, tasks: &[Task]) -> CaseResult<()> {
        let texts: Vec<String> = tasks.iter().map(Task::searchable_text).collect();
        let vectors = self.gateway.embed_batch(&texts).await?;

        let chunks = tasks
            .iter()
            .zip(texts)
            .zip(vectors)
            .map(|((task, text), vector)| {
                ContentChunk::new(
                    task_chunk_id(case_id, &task.id),
                    case_id,
                    text,
                    vector,
                    task.chunk_metadata(),
                )
            })
            .collect::<CaseResult<Vec<_>>>()?;

        provider_call("knowledge store", self.timeout, self.store.add_chunks(&chunks)).await
    }
}
