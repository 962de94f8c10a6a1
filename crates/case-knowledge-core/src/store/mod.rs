//! Knowledge Store abstraction: vector index plus per-chunk metadata.
//!
//! The [`KnowledgeStore`] trait is the behavioral contract every vector
//! index backend must satisfy, independent of any product's API:
//!
//! | Method | Contract |
//! |--------|----------|
//! | [`add_chunks`](KnowledgeStore::add_chunks) | upsert by `chunk_id`; all vectors share one dimension |
//! | [`fetch_by_case`](KnowledgeStore::fetch_by_case) | metadata-filtered read, unordered |
//! | [`delete_by_case`](KnowledgeStore::delete_by_case) | one bulk filtered delete |
//! | [`search`](KnowledgeStore::search) | cosine similarity, descending |
//!
//! The store has no foreign keys into the case registry. Entries are owned
//! by `case_id` only logically; chunk ids are namespaced by case and
//! document so cases never collide.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{ChunkMetadata, ContentChunk};

/// A search hit: chunk text and metadata with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub case_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f64,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace chunks by `chunk_id`.
    ///
    /// Fails without writing anything if the batch mixes dimensions or
    /// disagrees with the dimension already pinned by the index.
    async fn add_chunks(&self, chunks: &[ContentChunk]) -> Result<()>;

    /// All chunks tagged with `case_id`, in no particular order.
    async fn fetch_by_case(&self, case_id: &str) -> Result<Vec<ContentChunk>>;

    /// Remove every chunk tagged with `case_id`; returns the number removed.
    async fn delete_by_case(&self, case_id: &str) -> Result<u64>;

    /// Top-`k` chunks by cosine similarity, optionally within one case.
    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        case_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Validates that a batch shares one dimension and matches `pinned`.
///
/// Returns the batch dimension, or `None` for an empty batch.
pub fn check_batch_dims(chunks: &[ContentChunk], pinned: Option<usize>) -> Result<Option<usize>> {
    let Some(first) = chunks.first() else {
        return Ok(None);
    };
    let dims = first.dims();
    if let Some(bad) = chunks.iter().find(|c| c.dims() != dims) {
        bail!(
            "mixed embedding dimensions in batch: {} has {}, expected {}",
            bad.chunk_id,
            bad.dims(),
            dims
        );
    }
    if let Some(expected) = pinned {
        if expected != dims {
            bail!(
                "embedding dimension mismatch: index is pinned to {}, got {}",
                expected,
                dims
            );
        }
    }
    Ok(Some(dims))
}

/// Sorts hits by descending score, breaking ties by `chunk_id`.
pub fn rank(mut hits: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);
    hits
}
