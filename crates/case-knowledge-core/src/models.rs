//! Case data model.
//!
//! These types flow through normalization, indexing, task extraction and
//! deletion. Chunk metadata is a tagged enum keyed by `doc_type`, so each
//! variant carries only the fields that make sense for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CaseError, CaseResult};

/// A case groups all files and tasks recorded for one investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl Case {
    /// Creates a case with a fresh UUID.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }
}

impl Default for Case {
    fn default() -> Self {
        Self::new()
    }
}

/// Modality of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Document,
    Audio,
    Image,
}

impl FileType {
    pub const ALL: [FileType; 3] = [FileType::Document, FileType::Audio, FileType::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Document => "document",
            FileType::Audio => "audio",
            FileType::Image => "image",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "document" => Some(FileType::Document),
            "audio" => Some(FileType::Audio),
            "image" => Some(FileType::Image),
            _ => None,
        }
    }

    /// The chunk type produced when a file of this modality is normalized.
    pub fn doc_type(&self) -> DocType {
        match self {
            FileType::Document => DocType::Document,
            FileType::Audio => DocType::AudioTranscription,
            FileType::Image => DocType::Image,
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content a chunk was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Document,
    AudioTranscription,
    Image,
    Task,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Document => "document",
            DocType::AudioTranscription => "audio_transcription",
            DocType::Image => "image",
            DocType::Task => "task",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "document" => Some(DocType::Document),
            "audio_transcription" => Some(DocType::AudioTranscription),
            "image" => Some(DocType::Image),
            "task" => Some(DocType::Task),
            _ => None,
        }
    }
}

/// Per-variant chunk metadata.
///
/// Serialized with an internal `doc_type` tag so the stored JSON is
/// self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "doc_type", rename_all = "snake_case")]
pub enum ChunkMetadata {
    Document {
        doc_id: String,
        source_filename: String,
        mime_type: String,
        chunk_index: u32,
        total_chunks: u32,
    },
    AudioTranscription {
        doc_id: String,
        source_filename: String,
        mime_type: String,
    },
    Image {
        doc_id: String,
        source_filename: String,
        mime_type: String,
    },
    Task {
        task_id: String,
        title: String,
        priority: TaskPriority,
        category: TaskCategory,
    },
}

impl ChunkMetadata {
    pub fn doc_type(&self) -> DocType {
        match self {
            ChunkMetadata::Document { .. } => DocType::Document,
            ChunkMetadata::AudioTranscription { .. } => DocType::AudioTranscription,
            ChunkMetadata::Image { .. } => DocType::Image,
            ChunkMetadata::Task { .. } => DocType::Task,
        }
    }

    /// The uploaded file (or task) this chunk was derived from.
    pub fn doc_id(&self) -> &str {
        match self {
            ChunkMetadata::Document { doc_id, .. }
            | ChunkMetadata::AudioTranscription { doc_id, .. }
            | ChunkMetadata::Image { doc_id, .. } => doc_id,
            ChunkMetadata::Task { task_id, .. } => task_id,
        }
    }

    /// Original filename; `None` for task chunks.
    pub fn source_filename(&self) -> Option<&str> {
        match self {
            ChunkMetadata::Document {
                source_filename, ..
            }
            | ChunkMetadata::AudioTranscription {
                source_filename, ..
            }
            | ChunkMetadata::Image {
                source_filename, ..
            } => Some(source_filename),
            ChunkMetadata::Task { .. } => None,
        }
    }

    /// Position within the source; single-chunk variants are always `0`.
    pub fn chunk_index(&self) -> u32 {
        match self {
            ChunkMetadata::Document { chunk_index, .. } => *chunk_index,
            _ => 0,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        match self {
            ChunkMetadata::Document { total_chunks, .. } => *total_chunks,
            _ => 1,
        }
    }

    fn validate(&self) -> CaseResult<()> {
        if self.doc_id().trim().is_empty() {
            return Err(CaseError::invalid_input("chunk metadata requires a doc id"));
        }
        if let Some(name) = self.source_filename() {
            if name.trim().is_empty() {
                return Err(CaseError::invalid_input(
                    "chunk metadata requires a source filename",
                ));
            }
        }
        if let ChunkMetadata::Document {
            chunk_index,
            total_chunks,
            ..
        } = self
        {
            if *total_chunks == 0 || chunk_index >= total_chunks {
                return Err(CaseError::invalid_input(format!(
                    "chunk_index {} out of range for {} chunks",
                    chunk_index, total_chunks
                )));
            }
        }
        if let ChunkMetadata::Task { title, .. } = self {
            if title.trim().is_empty() {
                return Err(CaseError::invalid_input("task chunk requires a title"));
            }
        }
        Ok(())
    }
}

/// Normalized text awaiting its embedding.
///
/// Produced by the normalizer; turned into a [`ContentChunk`] only once
/// the vector is available, so text is never stored without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl PendingChunk {
    pub fn into_content_chunk(self, case_id: &str, embedding: Vec<f32>) -> CaseResult<ContentChunk> {
        ContentChunk::new(self.chunk_id, case_id, self.text, embedding, self.metadata)
    }
}

/// An indexed chunk: text, vector and metadata scoped to one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub chunk_id: String,
    pub case_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl ContentChunk {
    /// Builds a chunk after validating ids, metadata and the vector.
    pub fn new(
        chunk_id: impl Into<String>,
        case_id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> CaseResult<Self> {
        let chunk = Self {
            chunk_id: chunk_id.into(),
            case_id: case_id.into(),
            text: text.into(),
            embedding,
            metadata,
        };
        if chunk.chunk_id.trim().is_empty() {
            return Err(CaseError::invalid_input("chunk_id must not be empty"));
        }
        if chunk.case_id.trim().is_empty() {
            return Err(CaseError::invalid_input("case_id must not be empty"));
        }
        if chunk.embedding.is_empty() {
            return Err(CaseError::invalid_input(format!(
                "chunk {} has no embedding",
                chunk.chunk_id
            )));
        }
        chunk.metadata.validate()?;
        Ok(chunk)
    }

    pub fn doc_type(&self) -> DocType {
        self.metadata.doc_type()
    }

    pub fn dims(&self) -> usize {
        self.embedding.len()
    }
}

/// Builds the namespaced id of a chunk derived from an uploaded file.
pub fn file_chunk_id(case_id: &str, doc_id: &str, chunk_index: u32) -> String {
    format!("{}_{}_{}", case_id, doc_id, chunk_index)
}

/// Builds the namespaced id of the chunk mirroring a task.
pub fn task_chunk_id(case_id: &str, task_id: &str) -> String {
    format!("{}_task_{}", case_id, task_id)
}

/// Relational record for one uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub case_id: String,
    pub file_type: FileType,
    pub original_filename: String,
    pub storage_path: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Object storage layout: `cases/{case_id}/{file_type}s/{filename}`.
pub fn storage_path(case_id: &str, file_type: FileType, filename: &str) -> String {
    format!("cases/{}/{}s/{}", case_id, file_type.as_str(), filename)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 3] = [TaskPriority::High, TaskPriority::Medium, TaskPriority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    /// Case-insensitive parse; anything unrecognised falls back to `Medium`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => TaskPriority::High,
            "low" => TaskPriority::Low,
            _ => TaskPriority::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Safety,
    Compliance,
    Maintenance,
    Documentation,
    General,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 5] = [
        TaskCategory::Safety,
        TaskCategory::Compliance,
        TaskCategory::Maintenance,
        TaskCategory::Documentation,
        TaskCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Safety => "safety",
            TaskCategory::Compliance => "compliance",
            TaskCategory::Maintenance => "maintenance",
            TaskCategory::Documentation => "documentation",
            TaskCategory::General => "general",
        }
    }

    /// Case-insensitive parse; anything unrecognised falls back to `General`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "safety" => TaskCategory::Safety,
            "compliance" => TaskCategory::Compliance,
            "maintenance" => TaskCategory::Maintenance,
            "documentation" => TaskCategory::Documentation,
            _ => TaskCategory::General,
        }
    }
}

/// A task as parsed from model output, before it is stamped with a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub category: TaskCategory,
    pub reasoning: String,
}

/// A persisted, actionable task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub case_id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub category: TaskCategory,
    pub source_chunk_ids: Vec<String>,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn from_draft(draft: TaskDraft, case_id: &str, source_chunk_ids: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            case_id: case_id.to_string(),
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            category: draft.category,
            source_chunk_ids,
            reasoning: draft.reasoning,
            created_at: Utc::now(),
        }
    }

    /// Text indexed for semantic search over tasks.
    pub fn searchable_text(&self) -> String {
        format!(
            "Task: {}\nDescription: {}\nPriority: {}\nCategory: {}\nReasoning: {}",
            self.title,
            self.description,
            self.priority.as_str(),
            self.category.as_str(),
            self.reasoning
        )
    }

    pub fn chunk_metadata(&self) -> ChunkMetadata {
        ChunkMetadata::Task {
            task_id: self.id.clone(),
            title: self.title.clone(),
            priority: self.priority,
            category: self.category,
        }
    }
}

/// One file handed to case creation.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Declared content type; detected from the extension when absent.
    pub content_type: Option<String>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_meta(index: u32, total: u32) -> ChunkMetadata {
        ChunkMetadata::Document {
            doc_id: "d1".to_string(),
            source_filename: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            chunk_index: index,
            total_chunks: total,
        }
    }

    #[test]
    fn metadata_serializes_with_doc_type_tag() {
        let json = serde_json::to_value(doc_meta(0, 2)).unwrap();
        assert_eq!(json["doc_type"], "document");
        assert_eq!(json["source_filename"], "report.pdf");

        let back: ChunkMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back.doc_type(), DocType::Document);
    }

    #[test]
    fn task_metadata_has_no_filename() {
        let meta = ChunkMetadata::Task {
            task_id: "t1".to_string(),
            title: "Inspect scaffold".to_string(),
            priority: TaskPriority::High,
            category: TaskCategory::Safety,
        };
        assert_eq!(meta.source_filename(), None);
        assert_eq!(meta.total_chunks(), 1);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["doc_type"], "task");
        assert_eq!(json["priority"], "high");
    }

    #[test]
    fn chunk_rejects_index_out_of_range() {
        let err = ContentChunk::new("c", "case", "text", vec![1.0], doc_meta(2, 2)).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn chunk_rejects_missing_embedding() {
        let err = ContentChunk::new("c", "case", "text", vec![], doc_meta(0, 1)).unwrap_err();
        assert!(err.to_string().contains("no embedding"));
    }

    #[test]
    fn lenient_parsing_defaults() {
        assert_eq!(TaskPriority::parse_lenient("HIGH"), TaskPriority::High);
        assert_eq!(TaskPriority::parse_lenient("urgent"), TaskPriority::Medium);
        assert_eq!(TaskCategory::parse_lenient(" Safety "), TaskCategory::Safety);
        assert_eq!(TaskCategory::parse_lenient("logistics"), TaskCategory::General);
    }

    #[test]
    fn storage_path_layout() {
        assert_eq!(
            storage_path("c1", FileType::Audio, "walkthrough.m4a"),
            "cases/c1/audios/walkthrough.m4a"
        );
    }

    #[test]
    fn chunk_ids_are_namespaced_by_case() {
        assert_eq!(file_chunk_id("c1", "d1", 3), "c1_d1_3");
        assert_eq!(task_chunk_id("c1", "t9"), "c1_task_t9");
        assert_ne!(file_chunk_id("c1", "d1", 0), file_chunk_id("c2", "d1", 0));
    }
}
