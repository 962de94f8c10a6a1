//! Context assembly for grounded question answering.
//!
//! Search hits are numbered in rank order and prefixed with a citation
//! label so the completion can refer back to them:
//!
//! ```text
//! [Source 1: inspection.pdf, chunk 2]
//! Rebar exposed at column C4.
//!
//! [Source 2: Task — Repair slab edge]
//! Task: Repair slab edge ...
//! ```

use serde::Serialize;

use crate::models::{ChunkMetadata, DocType};
use crate::provider::CompletionRequest;
use crate::store::ScoredChunk;

/// System message for answering from retrieved context.
pub const ANSWER_SYSTEM_PROMPT: &str = "You are an assistant for construction site case records. \
Answer the question using only the numbered sources in the provided context. \
Cite the sources you rely on by their number, for example [Source 2]. \
If the context does not contain enough information to answer, say that you cannot answer from the available records.";

/// A numbered reference back to the chunk a piece of context came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// 1-based position in the context.
    pub source: usize,
    pub label: String,
    pub chunk_id: String,
    pub case_id: String,
    pub doc_type: DocType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,
    pub score: f64,
}

/// Human-readable label for the `source`-th hit.
///
/// File chunks are labelled with a 1-based chunk number; task chunks with
/// the task title.
pub fn citation_label(source: usize, metadata: &ChunkMetadata) -> String {
    match metadata {
        ChunkMetadata::Task { title, .. } => format!("[Source {}: Task — {}]", source, title),
        other => format!(
            "[Source {}: {}, chunk {}]",
            source,
            other.source_filename().unwrap_or("unknown"),
            other.chunk_index() + 1
        ),
    }
}

/// Assembled context and the citations it refers to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

/// Builds the labelled context string, preserving rank order.
pub fn assemble_context(hits: &[ScoredChunk]) -> AssembledContext {
    let mut blocks = Vec::with_capacity(hits.len());
    let mut citations = Vec::with_capacity(hits.len());

    for (i, hit) in hits.iter().enumerate() {
        let source = i + 1;
        let label = citation_label(source, &hit.metadata);
        blocks.push(format!("{}\n{}", label, hit.text.trim()));
        citations.push(Citation {
            source,
            label,
            chunk_id: hit.chunk_id.clone(),
            case_id: hit.case_id.clone(),
            doc_type: hit.metadata.doc_type(),
            source_filename: hit.metadata.source_filename().map(str::to_string),
            score: hit.score,
        });
    }

    AssembledContext {
        text: blocks.join("\n\n"),
        citations,
    }
}

/// Completion request asking for an answer grounded in `context`.
pub fn answer_request(context: &AssembledContext, question: &str) -> CompletionRequest {
    let user = format!(
        "Context:\n{}\n\nQuestion: {}\n\nAnswer using only the context above and cite sources by number.",
        context.text,
        question.trim()
    );
    CompletionRequest::new(ANSWER_SYSTEM_PROMPT, user)
}
