//! Retrieval engine: question → embedded query → ranked chunks → cited
//! answer.
//!
//! When the search returns nothing the engine answers with
//! [`NO_CONTEXT_ANSWER`] without calling the completer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use case_knowledge_core::context::{answer_request, assemble_context, Citation};
use case_knowledge_core::error::{CaseError, CaseResult};
use case_knowledge_core::provider::Completer;
use case_knowledge_core::store::KnowledgeStore;

use crate::embedding::EmbeddingGateway;
use crate::lifecycle::provider_call;

pub const NO_CONTEXT_ANSWER: &str =
    "I cannot answer this question because no relevant case records were found.";

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

pub struct RetrievalEngine {
    gateway: EmbeddingGateway,
    store: Arc<dyn KnowledgeStore>,
    completer: Arc<dyn Completer>,
    top_k: usize,
    timeout: Duration,
    completion_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(
        gateway: EmbeddingGateway,
        store: Arc<dyn KnowledgeStore>,
        completer: Arc<dyn Completer>,
        top_k: usize,
        timeout: Duration,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            completer,
            top_k: top_k.max(1),
            timeout,
            completion_timeout,
        }
    }

    /// Answers `question` from the indexed records, optionally restricted
    /// to one case.
    pub async fn query(&self, question: &str, case_id: Option<&str>) -> CaseResult<QueryAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CaseError::invalid_input("query text must not be empty"));
        }

        let query_vec = self.gateway.embed(question).await?;
        let hits = provider_call(
            "knowledge store",
            self.timeout,
            self.store.search(&query_vec, self.top_k, case_id),
        )
        .await?;

        let context = assemble_context(&hits);
        tracing::debug!(hits = context.citations.len(), ?case_id, "retrieved context");
        if context.is_empty() {
            return Ok(QueryAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
            });
        }

        let request = answer_request(&context, question);
        let answer =
            provider_call("completion", self.completion_timeout, self.completer.complete(&request))
                .await?;

        Ok(QueryAnswer {
            answer,
            citations: context.citations,
        })
    }
}
