//! SQLite-backed [`KnowledgeStore`].
//!
//! Chunks live in `knowledge_chunks` with their vector as a little-endian
//! f32 BLOB and their typed metadata as JSON. The single row of
//! `knowledge_index` pins the embedding model and dimension for the whole
//! index. Search is brute-force cosine similarity over the candidate rows.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use case_knowledge_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use case_knowledge_core::models::{ChunkMetadata, ContentChunk};
use case_knowledge_core::store::{check_batch_dims, rank, KnowledgeStore, ScoredChunk};

pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

/// The model and dimension recorded for the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPin {
    pub model: Option<String>,
    pub dims: usize,
}

impl SqliteKnowledgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn pinned(&self) -> Result<Option<IndexPin>> {
        let row = sqlx::query("SELECT model, dims FROM knowledge_index WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| IndexPin {
            model: r.get("model"),
            dims: r.get::<i64, _>("dims") as usize,
        }))
    }

    /// Records `model`/`dims` for an empty index, or verifies they match
    /// what the index was built with.
    pub async fn pin_model(&self, model: &str, dims: usize) -> Result<()> {
        match self.pinned().await? {
            None => {
                sqlx::query("INSERT INTO knowledge_index (id, model, dims) VALUES (1, ?, ?)")
                    .bind(model)
                    .bind(dims as i64)
                    .execute(&self.pool)
                    .await?;
            }
            Some(pin) => {
                if pin.dims != dims {
                    bail!(
                        "embedding dimension mismatch: index was built with {} dims, provider '{}' produces {}",
                        pin.dims,
                        model,
                        dims
                    );
                }
                match pin.model {
                    Some(existing) if existing != model => bail!(
                        "embedding model mismatch: index was built with '{}', configured '{}'",
                        existing,
                        model
                    ),
                    Some(_) => {}
                    None => {
                        sqlx::query("UPDATE knowledge_index SET model = ? WHERE id = 1")
                            .bind(model)
                            .execute(&self.pool)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn count_by_case(&self, case_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks WHERE case_id = ?")
                .bind(case_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<ContentChunk> {
    let chunk_id: String = row.get("chunk_id");
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("Corrupt metadata for chunk {}", chunk_id))?;
    let blob: Vec<u8> = row.get("embedding");
    Ok(ContentChunk {
        chunk_id,
        case_id: row.get("case_id"),
        text: row.get("text"),
        embedding: blob_to_vec(&blob),
        metadata,
    })
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn add_chunks(&self, chunks: &[ContentChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        // Write lock up front: a deferred transaction that reads the pin and
        // then writes fails with SQLITE_BUSY once a sibling writer commits.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let pinned: Option<i64> = sqlx::query_scalar("SELECT dims FROM knowledge_index WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await?;
        let pinned = pinned.map(|d| d as usize);
        let dims = check_batch_dims(chunks, pinned)?;
        if let (None, Some(dims)) = (pinned, dims) {
            sqlx::query("INSERT INTO knowledge_index (id, model, dims) VALUES (1, NULL, ?)")
                .bind(dims as i64)
                .execute(&mut *tx)
                .await?;
        }

        for chunk in chunks {
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks (chunk_id, case_id, doc_id, doc_type, source_filename,
                                              chunk_index, total_chunks, text, embedding, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    case_id = excluded.case_id,
                    doc_id = excluded.doc_id,
                    doc_type = excluded.doc_type,
                    source_filename = excluded.source_filename,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    text = excluded.text,
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.case_id)
            .bind(chunk.metadata.doc_id())
            .bind(chunk.doc_type().as_str())
            .bind(chunk.metadata.source_filename())
            .bind(chunk.metadata.chunk_index() as i64)
            .bind(chunk.metadata.total_chunks() as i64)
            .bind(&chunk.text)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_by_case(&self, case_id: &str) -> Result<Vec<ContentChunk>> {
        let rows = sqlx::query(
            "SELECT chunk_id, case_id, text, embedding, metadata_json FROM knowledge_chunks WHERE case_id = ?",
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn delete_by_case(&self, case_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM knowledge_chunks WHERE case_id = ?")
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        case_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = match case_id {
            Some(id) => {
                sqlx::query(
                    "SELECT chunk_id, case_id, text, embedding, metadata_json FROM knowledge_chunks WHERE case_id = ?",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id, case_id, text, embedding, metadata_json FROM knowledge_chunks",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            let score = cosine_similarity(query_vec, &chunk.embedding) as f64;
            hits.push(ScoredChunk {
                chunk_id: chunk.chunk_id,
                case_id: chunk.case_id,
                text: chunk.text,
                metadata: chunk.metadata,
                score,
            });
        }

        Ok(rank(hits, k))
    }
}
