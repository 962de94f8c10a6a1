//! Content normalizer: one uploaded file → pending chunks.
//!
//! | Modality | Chunks | Source of text |
//! |----------|--------|----------------|
//! | document | 0..n   | extracted text, token-bounded chunks |
//! | audio    | 1      | transcript after a cleaning completion |
//! | image    | 1      | construction-domain caption |
//!
//! Every failure is a [`CaseError::Ingestion`] naming the file, so the
//! coordinator can record it against that file alone.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use case_knowledge_core::chunk::document_chunks;
use case_knowledge_core::error::{CaseError, CaseResult};
use case_knowledge_core::models::{file_chunk_id, ChunkMetadata, FileType, PendingChunk, UploadedFile};
use case_knowledge_core::provider::{Captioner, Completer, CompletionRequest, Transcriber};

use crate::extract::{extract_text, mime_for_filename};

pub const CLEAN_INSTRUCTION: &str = "You are a helpful assistant in the construction setting. \
Please look at this transcription that was said by a worker and strip out all profanities, \
unnecessary content, and only return what is relevant to the problem that they are trying to solve or document.";

pub const CAPTION_PROMPT: &str =
    "The image is coming from construction sites, what is the image in the context of construction?";

/// Content type of an upload: the declared one, else detected from the name.
pub fn resolve_mime(file: &UploadedFile) -> String {
    file.content_type
        .as_deref()
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| mime_for_filename(&file.filename).to_string())
}

pub struct Normalizer {
    transcriber: Arc<dyn Transcriber>,
    cleaner: Arc<dyn Completer>,
    captioner: Arc<dyn Captioner>,
    max_tokens: usize,
    timeout: Duration,
}

impl Normalizer {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        cleaner: Arc<dyn Completer>,
        captioner: Arc<dyn Captioner>,
        max_tokens: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            transcriber,
            cleaner,
            captioner,
            max_tokens,
            timeout,
        }
    }

    /// Dispatches on modality.
    pub async fn normalize(
        &self,
        file_type: FileType,
        case_id: &str,
        doc_id: &str,
        file: &UploadedFile,
    ) -> CaseResult<Vec<PendingChunk>> {
        match file_type {
            FileType::Document => self.normalize_document(case_id, doc_id, file).await,
            FileType::Audio => self.normalize_audio(case_id, doc_id, file).await,
            FileType::Image => self.normalize_image(case_id, doc_id, file).await,
        }
    }

    pub async fn normalize_document(
        &self,
        case_id: &str,
        doc_id: &str,
        file: &UploadedFile,
    ) -> CaseResult<Vec<PendingChunk>> {
        let mime_type = resolve_mime(file);
        let bytes = file.bytes.clone();
        let content_type = mime_type.clone();
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &content_type))
            .await
            .map_err(|e| CaseError::ingestion(&file.filename, format!("extraction task failed: {}", e)))?
            .map_err(|e| CaseError::ingestion(&file.filename, e))?;

        let chunks = document_chunks(
            case_id,
            doc_id,
            &file.filename,
            &mime_type,
            &text,
            self.max_tokens,
        );
        if chunks.is_empty() {
            return Err(CaseError::ingestion(&file.filename, "no extractable text"));
        }
        tracing::debug!(filename = %file.filename, chunks = chunks.len(), "document normalized");
        Ok(chunks)
    }

    pub async fn normalize_audio(
        &self,
        case_id: &str,
        doc_id: &str,
        file: &UploadedFile,
    ) -> CaseResult<Vec<PendingChunk>> {
        let mime_type = resolve_mime(file);
        let raw = self
            .bounded(
                &file.filename,
                "transcription",
                self.transcriber
                    .transcribe(&file.filename, &mime_type, &file.bytes),
            )
            .await?;
        if raw.trim().is_empty() {
            return Err(CaseError::ingestion(&file.filename, "transcription is empty"));
        }

        let request = CompletionRequest::new(CLEAN_INSTRUCTION, raw.trim());
        let cleaned = self
            .bounded(&file.filename, "transcript cleaning", self.cleaner.complete(&request))
            .await?;
        let text = cleaned.trim();
        if text.is_empty() {
            return Err(CaseError::ingestion(&file.filename, "cleaned transcript is empty"));
        }

        Ok(vec![PendingChunk {
            chunk_id: file_chunk_id(case_id, doc_id, 0),
            text: text.to_string(),
            metadata: ChunkMetadata::AudioTranscription {
                doc_id: doc_id.to_string(),
                source_filename: file.filename.clone(),
                mime_type,
            },
        }])
    }

    pub async fn normalize_image(
        &self,
        case_id: &str,
        doc_id: &str,
        file: &UploadedFile,
    ) -> CaseResult<Vec<PendingChunk>> {
        let mime_type = resolve_mime(file);
        let caption = self
            .bounded(
                &file.filename,
                "captioning",
                self.captioner.caption(CAPTION_PROMPT, &mime_type, &file.bytes),
            )
            .await?;
        let text = caption.trim();
        if text.is_empty() {
            return Err(CaseError::ingestion(&file.filename, "caption is empty"));
        }

        Ok(vec![PendingChunk {
            chunk_id: file_chunk_id(case_id, doc_id, 0),
            text: text.to_string(),
            metadata: ChunkMetadata::Image {
                doc_id: doc_id.to_string(),
                source_filename: file.filename.clone(),
                mime_type,
            },
        }])
    }

    /// Runs one collaborator call under the normalizer timeout.
    async fn bounded<F>(&self, filename: &str, stage: &str, call: F) -> CaseResult<String>
    where
        F: Future<Output = anyhow::Result<String>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(CaseError::ingestion(filename, format!("{} failed: {:#}", stage, e))),
            Err(_) => Err(CaseError::ingestion(
                filename,
                format!("{} timed out after {:?}", stage, self.timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedTranscript(&'static str);

    #[async_trait]
    impl Transcriber for FixedTranscript {
        async fn transcribe(&self, _: &str, _: &str, _: &[u8]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    /// Records the request and returns the user text upper-cased.
    #[derive(Default)]
    struct RecordingCleaner(Mutex<Vec<CompletionRequest>>);

    #[async_trait]
    impl Completer for RecordingCleaner {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.0.lock().unwrap().push(request.clone());
            Ok(request.user.to_uppercase())
        }
    }

    struct FixedCaption(Result<&'static str, &'static str>);

    #[async_trait]
    impl Captioner for FixedCaption {
        async fn caption(&self, prompt: &str, _: &str, _: &[u8]) -> Result<String> {
            assert_eq!(prompt, CAPTION_PROMPT);
            match self.0 {
                Ok(c) => Ok(c.to_string()),
                Err(e) => bail!(e),
            }
        }
    }

    fn normalizer(cleaner: Arc<RecordingCleaner>, caption: FixedCaption) -> Normalizer {
        Normalizer::new(
            Arc::new(FixedTranscript("  the damn ladder is cracked  ")),
            cleaner,
            Arc::new(caption),
            300,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn document_chunks_carry_back_references() {
        let n = normalizer(Arc::default(), FixedCaption(Ok("x")));
        let text = "Foundation poured.\n\nRebar inspected.".to_string();
        let file = UploadedFile::new("report.txt", text.into_bytes());
        let chunks = n.normalize_document("c1", "d1", &file).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "c1_d1_0");
        assert_eq!(chunks[0].metadata.source_filename(), Some("report.txt"));
        assert_eq!(chunks[0].metadata.total_chunks(), 1);
    }

    #[tokio::test]
    async fn unreadable_document_is_an_ingestion_error() {
        let n = normalizer(Arc::default(), FixedCaption(Ok("x")));
        let file = UploadedFile::new("broken.pdf", b"not a pdf".to_vec());
        let err = n.normalize_document("c1", "d1", &file).await.unwrap_err();
        assert_eq!(err.kind(), "ingestion_error");
        assert!(err.to_string().contains("broken.pdf"));
    }

    #[tokio::test]
    async fn blank_document_is_rejected() {
        let n = normalizer(Arc::default(), FixedCaption(Ok("x")));
        let file = UploadedFile::new("blank.txt", b"   \n\n ".to_vec());
        let err = n.normalize_document("c1", "d1", &file).await.unwrap_err();
        assert!(err.to_string().contains("no extractable text"));
    }

    #[tokio::test]
    async fn audio_is_cleaned_into_one_chunk() {
        let cleaner = Arc::new(RecordingCleaner::default());
        let n = normalizer(cleaner.clone(), FixedCaption(Ok("x")));
        let file = UploadedFile::new("memo.m4a", vec![0u8; 16]);
        let chunks = n.normalize_audio("c1", "a1", &file).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "THE DAMN LADDER IS CRACKED");
        assert!(matches!(
            &chunks[0].metadata,
            ChunkMetadata::AudioTranscription { mime_type, .. } if mime_type == "audio/mp4"
        ));
        let requests = cleaner.0.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system, CLEAN_INSTRUCTION);
        assert_eq!(requests[0].user, "the damn ladder is cracked");
    }

    #[tokio::test]
    async fn image_caption_becomes_one_chunk() {
        let n = normalizer(Arc::default(), FixedCaption(Ok("Scaffolding without guardrails.")));
        let file = UploadedFile::new("site.JPG", vec![0xff, 0xd8]);
        let chunks = n.normalize_image("c1", "i1", &file).await.unwrap();
        assert_eq!(chunks[0].chunk_id, "c1_i1_0");
        assert_eq!(chunks[0].text, "Scaffolding without guardrails.");
        assert!(matches!(
            &chunks[0].metadata,
            ChunkMetadata::Image { mime_type, .. } if mime_type == "image/jpeg"
        ));
    }

    #[tokio::test]
    async fn caption_failure_names_the_file() {
        let n = normalizer(Arc::default(), FixedCaption(Err("vision model overloaded")));
        let file = UploadedFile::new("crane.png", vec![1, 2, 3]);
        let err = n.normalize_image("c1", "i1", &file).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("crane.png"));
        assert!(message.contains("vision model overloaded"));
    }

    #[test]
    fn declared_content_type_wins() {
        let file = UploadedFile::new("notes.bin", vec![]).with_content_type("text/plain");
        assert_eq!(resolve_mime(&file), "text/plain");
        assert_eq!(resolve_mime(&UploadedFile::new("x.wav", vec![])), "audio/wav");
    }
}
