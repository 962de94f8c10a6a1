//! Case lifecycle coordinator.
//!
//! # Creation
//!
//! ```text
//! create_case ─► per file (bounded JoinSet):
//!                  normalize ─► embed ─► add_chunks ─► upload blob ─► insert FileRecord
//!             ─► generate tasks once over the whole case
//! ```
//!
//! Each file's outcome is recorded independently; one failing file never
//! stops its siblings, and a task extraction failure is reported in the
//! result instead of failing the creation.
//!
//! # Deletion
//!
//! A compensating cascade, not a transaction. Registry rows are removed
//! child-before-parent (tasks, files and their blobs, then the case) and
//! the knowledge store gets one bulk `delete_by_case`. Failed steps are
//! reported and the remaining steps still run; nothing is rolled back.
//!
//! The two stores are only eventually consistent: a crash between steps
//! can leave chunks without registry rows or the reverse.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use case_knowledge_core::blob::BlobStore;
use case_knowledge_core::error::{CaseError, CaseResult, ErrorReport};
use case_knowledge_core::models::{storage_path, Case, FileRecord, FileType, Task, UploadedFile};
use case_knowledge_core::registry::CaseRegistry;
use case_knowledge_core::store::KnowledgeStore;

use crate::embedding::EmbeddingGateway;
use crate::normalize::{resolve_mime, Normalizer};
use crate::task_engine::TaskEngine;

/// Outcome of one uploaded file.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Succeeded {
        filename: String,
        file_id: String,
        chunk_count: usize,
        url: String,
    },
    Failed {
        filename: String,
        error: ErrorReport,
    },
}

impl FileOutcome {
    pub fn filename(&self) -> &str {
        match self {
            FileOutcome::Succeeded { filename, .. } | FileOutcome::Failed { filename, .. } => {
                filename
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskSummary {
    Generated { count: usize, tasks: Vec<Task> },
    Failed { error: ErrorReport },
}

/// Result of [`LifecycleCoordinator::create_case`].
///
/// Each modality lists one outcome per submitted file, in submission
/// order.
#[derive(Debug, Clone, Serialize)]
pub struct CaseCreation {
    pub case_id: String,
    pub documents: Vec<FileOutcome>,
    pub audio: Vec<FileOutcome>,
    pub images: Vec<FileOutcome>,
    pub tasks: TaskSummary,
}

impl CaseCreation {
    pub fn outcomes(&self, file_type: FileType) -> &[FileOutcome] {
        match file_type {
            FileType::Document => &self.documents,
            FileType::Audio => &self.audio,
            FileType::Image => &self.images,
        }
    }

    pub fn succeeded(&self) -> usize {
        FileType::ALL
            .iter()
            .flat_map(|ft| self.outcomes(*ft))
            .filter(|o| o.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        FileType::ALL
            .iter()
            .flat_map(|ft| self.outcomes(*ft))
            .filter(|o| !o.is_success())
            .count()
    }
}

/// One step of a cascade delete.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeStep {
    pub step: &'static str,
    pub ok: bool,
    pub affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Result of [`LifecycleCoordinator::delete_case`].
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub case_id: String,
    pub steps: Vec<CascadeStep>,
    /// `true` only when every step succeeded.
    pub success: bool,
}

impl CascadeReport {
    fn new(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            steps: Vec::new(),
            success: true,
        }
    }

    fn record(&mut self, step: &'static str, result: anyhow::Result<u64>) {
        match result {
            Ok(affected) => self.steps.push(CascadeStep {
                step,
                ok: true,
                affected,
                error: None,
            }),
            Err(e) => {
                let err = CaseError::CascadeDelete {
                    step: step.to_string(),
                    reason: format!("{:#}", e),
                };
                tracing::error!(case_id = %self.case_id, step, error = %err, "cascade step failed");
                self.success = false;
                self.steps.push(CascadeStep {
                    step,
                    ok: false,
                    affected: 0,
                    error: Some(err.report()),
                });
            }
        }
    }
}

/// Where to fetch a stored file.
#[derive(Debug, Clone, Serialize)]
pub struct FileAccess {
    pub file_id: String,
    pub url: String,
    /// `false` when signing failed and `url` is the stored, unsigned one.
    pub signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
}

/// Runs an external store call under `timeout`, mapping both failure
/// modes to [`CaseError::Provider`].
pub(crate) async fn provider_call<T, F>(
    service: &'static str,
    timeout: Duration,
    call: F,
) -> CaseResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CaseError::provider(service, format!("{:#}", e))),
        Err(_) => Err(CaseError::provider(
            service,
            format!("timed out after {:?}", timeout),
        )),
    }
}

/// Everything one file's pipeline needs; cloned into each spawned task.
#[derive(Clone)]
struct FilePipeline {
    normalizer: Arc<Normalizer>,
    gateway: EmbeddingGateway,
    store: Arc<dyn KnowledgeStore>,
    registry: Arc<dyn CaseRegistry>,
    blobs: Arc<dyn BlobStore>,
    timeout: Duration,
}

impl FilePipeline {
    async fn run(&self, case_id: &str, file_type: FileType, file: &UploadedFile) -> FileOutcome {
        match self.ingest(case_id, file_type, file).await {
            Ok((file_id, chunk_count, url)) => {
                tracing::info!(case_id, filename = %file.filename, chunks = chunk_count, "file ingested");
                FileOutcome::Succeeded {
                    filename: file.filename.clone(),
                    file_id,
                    chunk_count,
                    url,
                }
            }
            Err(e) => {
                tracing::warn!(case_id, filename = %file.filename, error = %e, "file failed");
                FileOutcome::Failed {
                    filename: file.filename.clone(),
                    error: e.report(),
                }
            }
        }
    }

    async fn ingest(
        &self,
        case_id: &str,
        file_type: FileType,
        file: &UploadedFile,
    ) -> CaseResult<(String, usize, String)> {
        let file_id = uuid::Uuid::new_v4().to_string();

        let pending = self
            .normalizer
            .normalize(file_type, case_id, &file_id, file)
            .await?;

        // Text and vectors are stored together or not at all.
        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        let vectors = self.gateway.embed_batch(&texts).await?;
        let chunks = pending
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| chunk.into_content_chunk(case_id, vector))
            .collect::<CaseResult<Vec<_>>>()?;

        provider_call(
            "knowledge store",
            self.timeout,
            self.store.add_chunks(&chunks),
        )
        .await?;

        let mime_type = resolve_mime(file);
        let path = storage_path(case_id, file_type, &file.filename);
        let url = provider_call(
            "object storage",
            self.timeout,
            self.blobs.upload(&path, &file.bytes, &mime_type),
        )
        .await?;

        let record = FileRecord {
            id: file_id.clone(),
            case_id: case_id.to_string(),
            file_type,
            original_filename: file.filename.clone(),
            storage_path: path,
            mime_type,
            size: file.bytes.len() as i64,
            url: url.clone(),
            created_at: chrono::Utc::now(),
        };
        provider_call(
            "case registry",
            self.timeout,
            self.registry.insert_file(&record),
        )
        .await?;

        Ok((file_id, chunks.len(), url))
    }
}

pub struct LifecycleCoordinator {
    pipeline: FilePipeline,
    tasks: Arc<TaskEngine>,
    max_concurrent_files: usize,
}

impl LifecycleCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        normalizer: Arc<Normalizer>,
        gateway: EmbeddingGateway,
        store: Arc<dyn KnowledgeStore>,
        registry: Arc<dyn CaseRegistry>,
        blobs: Arc<dyn BlobStore>,
        tasks: Arc<TaskEngine>,
        max_concurrent_files: usize,
        store_timeout: Duration,
    ) -> Self {
        Self {
            pipeline: FilePipeline {
                normalizer,
                gateway,
                store,
                registry,
                blobs,
                timeout: store_timeout,
            },
            tasks,
            max_concurrent_files: max_concurrent_files.max(1),
        }
    }

    /// Registers a new case and ingests every file, then extracts tasks.
    ///
    /// Fails only when nothing was submitted or the case row cannot be
    /// written; per-file and task extraction failures are reported in the
    /// returned [`CaseCreation`].
    pub async fn create_case(
        &self,
        documents: Vec<UploadedFile>,
        audio: Vec<UploadedFile>,
        images: Vec<UploadedFile>,
    ) -> CaseResult<CaseCreation> {
        if documents.is_empty() && audio.is_empty() && images.is_empty() {
            return Err(CaseError::invalid_input(
                "at least one document, audio or image file is required",
            ));
        }

        let case = Case::new();
        let case_id = case.id.clone();
        provider_call(
            "case registry",
            self.pipeline.timeout,
            self.pipeline.registry.create_case(&case),
        )
        .await?;
        tracing::info!(
            case_id = %case_id,
            documents = documents.len(),
            audio = audio.len(),
            images = images.len(),
            "case created"
        );

        let submitted: Vec<(FileType, UploadedFile)> = documents
            .into_iter()
            .map(|f| (FileType::Document, f))
            .chain(audio.into_iter().map(|f| (FileType::Audio, f)))
            .chain(images.into_iter().map(|f| (FileType::Image, f)))
            .collect();
        let outcomes = self.ingest_all(&case_id, &submitted).await;

        let mut creation = CaseCreation {
            case_id: case_id.clone(),
            documents: Vec::new(),
            audio: Vec::new(),
            images: Vec::new(),
            tasks: TaskSummary::Generated {
                count: 0,
                tasks: Vec::new(),
            },
        };
        for ((file_type, _), outcome) in submitted.iter().zip(outcomes) {
            match file_type {
                FileType::Document => creation.documents.push(outcome),
                FileType::Audio => creation.audio.push(outcome),
                FileType::Image => creation.images.push(outcome),
            }
        }

        creation.tasks = match self.tasks.generate_tasks(&case_id).await {
            Ok(tasks) => TaskSummary::Generated {
                count: tasks.len(),
                tasks,
            },
            Err(e) => {
                tracing::warn!(case_id = %case_id, error = %e, "task generation failed");
                TaskSummary::Failed { error: e.report() }
            }
        };

        tracing::info!(
            case_id = %case_id,
            succeeded = creation.succeeded(),
            failed = creation.failed(),
            "case ingestion finished"
        );
        Ok(creation)
    }

    /// Runs every file's pipeline, at most `max_concurrent_files` at a
    /// time, and returns outcomes in submission order.
    async fn ingest_all(&self, case_id: &str, files: &[(FileType, UploadedFile)]) -> Vec<FileOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_files));
        let mut set = JoinSet::new();

        for (index, (file_type, file)) in files.iter().enumerate() {
            let pipeline = self.pipeline.clone();
            let semaphore = semaphore.clone();
            let case_id = case_id.to_string();
            let file_type = *file_type;
            let file = file.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, pipeline.run(&case_id, file_type, &file).await)
            });
        }

        let mut slots: Vec<Option<FileOutcome>> = vec![None; files.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!(case_id, error = %e, "file pipeline task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(files)
            .map(|(slot, (_, file))| {
                slot.unwrap_or_else(|| FileOutcome::Failed {
                    filename: file.filename.clone(),
                    error: CaseError::ingestion(&file.filename, "file pipeline aborted").report(),
                })
            })
            .collect()
    }

    /// Cascade-deletes a case from the registry, object storage and the
    /// knowledge store.
    ///
    /// Returns [`CaseError::NotFound`] for an unknown case; every other
    /// failure is recorded in the report and the remaining steps still run.
    pub async fn delete_case(&self, case_id: &str) -> CaseResult<CascadeReport> {
        let p = &self.pipeline;
        let exists = provider_call("case registry", p.timeout, p.registry.get_case(case_id)).await?;
        if exists.is_none() {
            return Err(CaseError::not_found("case", case_id));
        }

        let mut report = CascadeReport::new(case_id);

        let files = provider_call("case registry", p.timeout, p.registry.list_files(case_id)).await;
        match files {
            Ok(files) => {
                report.record("list_files", Ok(files.len() as u64));
                report.record("remove_blobs", self.remove_blobs(&files).await);
            }
            Err(e) => report.record("list_files", Err(e.into())),
        }

        report.record(
            "delete_tasks",
            bounded(p.timeout, p.registry.delete_tasks_by_case(case_id)).await,
        );
        report.record(
            "delete_files",
            bounded(p.timeout, p.registry.delete_files_by_case(case_id)).await,
        );
        report.record(
            "delete_case",
            bounded(p.timeout, p.registry.delete_case(case_id)).await,
        );
        report.record(
            "delete_chunks",
            bounded(p.timeout, p.store.delete_by_case(case_id)).await,
        );

        if report.success {
            tracing::info!(case_id, "case deleted");
        } else {
            tracing::warn!(case_id, "case deleted with failures");
        }
        Ok(report)
    }

    /// Removes each file's blob, continuing past failures. Fails if any
    /// removal failed.
    async fn remove_blobs(&self, files: &[FileRecord]) -> anyhow::Result<u64> {
        let p = &self.pipeline;
        let mut removed = 0u64;
        let mut failures = Vec::new();
        for file in files {
            match bounded(p.timeout, p.blobs.remove(&file.storage_path)).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %file.storage_path, error = %e, "failed to remove blob");
                    failures.push(file.storage_path.clone());
                }
            }
        }
        if failures.is_empty() {
            Ok(removed)
        } else {
            anyhow::bail!(
                "{} of {} blobs not removed: {}",
                failures.len(),
                files.len(),
                failures.join(", ")
            )
        }
    }

    /// A signed, time-limited URL for a stored file.
    ///
    /// When signing fails the stored URL is returned with `signed: false`.
    pub async fn file_url(&self, file_id: &str, ttl_secs: u64) -> CaseResult<FileAccess> {
        let record = self.file_record(file_id).await?;
        let p = &self.pipeline;
        match bounded(p.timeout, p.blobs.create_signed_url(&record.storage_path, ttl_secs)).await {
            Ok(url) => Ok(FileAccess {
                file_id: record.id,
                url,
                signed: true,
                expires_in_secs: Some(ttl_secs),
            }),
            Err(e) => {
                tracing::warn!(file_id, error = %e, "signed URL unavailable; using stored URL");
                Ok(FileAccess {
                    file_id: record.id,
                    url: record.url,
                    signed: false,
                    expires_in_secs: None,
                })
            }
        }
    }

    /// Downloads a stored file's bytes.
    pub async fn download_file(&self, file_id: &str) -> CaseResult<(FileRecord, Vec<u8>)> {
        let record = self.file_record(file_id).await?;
        let p = &self.pipeline;
        let bytes = provider_call(
            "object storage",
            p.timeout,
            p.blobs.download(&record.storage_path),
        )
        .await?;
        Ok((record, bytes))
    }

    async fn file_record(&self, file_id: &str) -> CaseResult<FileRecord> {
        let p = &self.pipeline;
        provider_call("case registry", p.timeout, p.registry.get_file(file_id))
            .await?
            .ok_or_else(|| CaseError::not_found("file", file_id))
    }
}

/// `tokio::time::timeout` folded into an `anyhow::Result`.
async fn bounded<T, F>(timeout: Duration, call: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {:?}", timeout))?
}
