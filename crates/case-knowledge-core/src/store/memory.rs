//! In-memory [`KnowledgeStore`] implementation for tests and embedders.
//!
//! Uses a `HashMap` keyed by chunk id behind `std::sync::RwLock`.
//! Vector search is brute-force cosine similarity over all stored vectors.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::ContentChunk;

use super::{check_batch_dims, rank, KnowledgeStore, ScoredChunk};

/// In-memory vector index.
pub struct InMemoryKnowledgeStore {
    chunks: RwLock<HashMap<String, ContentChunk>>,
    dims: RwLock<Option<usize>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            dims: RwLock::new(None),
        }
    }

    /// Total number of stored chunks across all cases.
    pub fn len(&self) -> usize {
        self.chunks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension pinned by the first stored batch.
    pub fn pinned_dims(&self) -> Option<usize> {
        *self.dims.read().unwrap()
    }
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn add_chunks(&self, chunks: &[ContentChunk]) -> Result<()> {
        let mut dims = self.dims.write().unwrap();
        if let Some(batch_dims) = check_batch_dims(chunks, *dims)? {
            *dims = Some(batch_dims);
        }
        let mut stored = self.chunks.write().unwrap();
        for c in chunks {
            stored.insert(c.chunk_id.clone(), c.clone());
        }
        Ok(())
    }

    async fn fetch_by_case(&self, case_id: &str) -> Result<Vec<ContentChunk>> {
        let stored = self.chunks.read().unwrap();
        Ok(stored
            .values()
            .filter(|c| c.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn delete_by_case(&self, case_id: &str) -> Result<u64> {
        let mut stored = self.chunks.write().unwrap();
        let before = stored.len();
        stored.retain(|_, c| c.case_id != case_id);
        Ok((before - stored.len()) as u64)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        case_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.chunks.read().unwrap();
        let hits: Vec<ScoredChunk> = stored
            .values()
            .filter(|c| case_id.map_or(true, |id| c.case_id == id))
            .map(|c| ScoredChunk {
                chunk_id: c.chunk_id.clone(),
                case_id: c.case_id.clone(),
                text: c.text.clone(),
                metadata: c.metadata.clone(),
                score: cosine_similarity(query_vec, &c.embedding) as f64,
            })
            .collect();
        Ok(rank(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(case_id: &str, id: &str, embedding: Vec<f32>) -> ContentChunk {
        ContentChunk::new(
            id,
            case_id,
            format!("text of {}", id),
            embedding,
            ChunkMetadata::Image {
                doc_id: id.to_string(),
                source_filename: format!("{}.jpg", id),
                mime_type: "image/jpeg".to_string(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn add_is_an_upsert() {
        let store = InMemoryKnowledgeStore::new();
        let c = chunk("case1", "a", vec![1.0, 0.0]);
        store.add_chunks(&[c.clone()]).await.unwrap();
        store.add_chunks(&[c]).await.unwrap();
        assert_eq!(store.fetch_by_case("case1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_dimension_change() {
        let store = InMemoryKnowledgeStore::new();
        store
            .add_chunks(&[chunk("case1", "a", vec![1.0, 0.0])])
            .await
            .unwrap();
        let err = store
            .add_chunks(&[chunk("case1", "b", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.pinned_dims(), Some(2));
    }

    #[tokio::test]
    async fn rejects_mixed_batch() {
        let store = InMemoryKnowledgeStore::new();
        let err = store
            .add_chunks(&[
                chunk("case1", "a", vec![1.0, 0.0]),
                chunk("case1", "b", vec![1.0]),
            ])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mixed"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_by_case_leaves_other_cases() {
        let store = InMemoryKnowledgeStore::new();
        store
            .add_chunks(&[
                chunk("case1", "a", vec![1.0, 0.0]),
                chunk("case1", "b", vec![0.0, 1.0]),
                chunk("case2", "c", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.delete_by_case("case1").await.unwrap(), 2);
        assert!(store.fetch_by_case("case1").await.unwrap().is_empty());
        assert_eq!(store.fetch_by_case("case2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_scopes_case() {
        let store = InMemoryKnowledgeStore::new();
        store
            .add_chunks(&[
                chunk("case1", "near", vec![1.0, 0.1]),
                chunk("case1", "far", vec![0.0, 1.0]),
                chunk("case2", "other", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let all = store.search(&[1.0, 0.0], 3, None).await.unwrap();
        assert_eq!(all[0].chunk_id, "other");
        assert_eq!(all[1].chunk_id, "near");
        assert_eq!(all[2].chunk_id, "far");

        let scoped = store.search(&[1.0, 0.0], 5, Some("case1")).await.unwrap();
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped[0].chunk_id, "near");
    }
}
