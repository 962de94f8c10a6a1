//! Query capabilities and their router.
//!
//! A fixed set of read-only capabilities, each a function of explicit
//! inputs over the registry, the knowledge store and the retrieval engine:
//!
//! | Capability | Returns |
//! |------------|---------|
//! | `case_lookup` | case, files with reconstructed content, tasks by priority |
//! | `search` | cited answer from the retrieval engine |
//! | `list_cases` | newest cases with file types and task counts |
//! | `task_analysis` | task totals and the top high-priority tasks |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use case_knowledge_core::chunk::reassemble;
use case_knowledge_core::error::{CaseError, CaseResult};
use case_knowledge_core::models::{Case, FileRecord, FileType, Task, TaskCategory, TaskPriority};
use case_knowledge_core::registry::CaseRegistry;
use case_knowledge_core::store::KnowledgeStore;

use crate::lifecycle::provider_call;
use crate::retrieval::{QueryAnswer, RetrievalEngine};

/// Reconstructed file content is cut at this many characters.
pub const MAX_CONTENT_CHARS: usize = 10_000;
/// High-priority tasks listed by task analysis.
pub const MAX_HIGHLIGHTS: usize = 5;
/// Description excerpt length in task analysis.
pub const EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCapability {
    CaseLookup { case_id: String },
    Search { query: String, case_id: Option<String> },
    ListCases { limit: usize, offset: usize },
    TaskAnalysis { case_id: Option<String> },
}

impl QueryCapability {
    pub fn name(&self) -> &'static str {
        match self {
            QueryCapability::CaseLookup { .. } => "case_lookup",
            QueryCapability::Search { .. } => "search",
            QueryCapability::ListCases { .. } => "list_cases",
            QueryCapability::TaskAnalysis { .. } => "task_analysis",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "capability", content = "result", rename_all = "snake_case")]
pub enum QueryResponse {
    CaseLookup(CaseDetails),
    Search(QueryAnswer),
    ListCases(CaseListing),
    TaskAnalysis(TaskAnalysis),
}

#[derive(Debug, Clone, Serialize)]
pub struct FileView {
    #[serde(flatten)]
    pub record: FileRecord,
    /// Text rebuilt from the file's chunks in chunk order.
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentSummary {
    pub documents: usize,
    pub audio: usize,
    pub images: usize,
    pub tasks: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseDetails {
    pub case: Case,
    pub files: BTreeMap<&'static str, Vec<FileView>>,
    pub tasks: BTreeMap<&'static str, Vec<Task>>,
    pub summary: ContentSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOverview {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub file_types: Vec<FileType>,
    pub file_count: usize,
    pub task_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseListing {
    pub cases: Vec<CaseOverview>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskHighlight {
    pub task_id: String,
    pub case_id: String,
    pub title: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    pub total: usize,
    pub by_priority: BTreeMap<&'static str, usize>,
    pub by_category: BTreeMap<&'static str, usize>,
    pub high_priority: Vec<TaskHighlight>,
}

/// Truncates to `max` characters, appending `...` when cut.
fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((byte, _)) => (format!("{}...", &text[..byte]), true),
        None => (text.to_string(), false),
    }
}

pub struct QueryRouter {
    registry: Arc<dyn CaseRegistry>,
    store: Arc<dyn KnowledgeStore>,
    retrieval: Arc<RetrievalEngine>,
    timeout: Duration,
}

impl QueryRouter {
    pub fn new(
        registry: Arc<dyn CaseRegistry>,
        store: Arc<dyn KnowledgeStore>,
        retrieval: Arc<RetrievalEngine>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            retrieval,
            timeout,
        }
    }

    pub async fn dispatch(&self, capability: QueryCapability) -> CaseResult<QueryResponse> {
        tracing::debug!(capability = capability.name(), "dispatching query");
        match capability {
            QueryCapability::CaseLookup { case_id } => {
                self.case_lookup(&case_id).await.map(QueryResponse::CaseLookup)
            }
            QueryCapability::Search { query, case_id } => self
                .retrieval
                .query(&query, case_id.as_deref())
                .await
                .map(QueryResponse::Search),
            QueryCapability::ListCases { limit, offset } => self
                .list_cases(limit, offset)
                .await
                .map(QueryResponse::ListCases),
            QueryCapability::TaskAnalysis { case_id } => self
                .task_analysis(case_id.as_deref())
                .await
                .map(QueryResponse::TaskAnalysis),
        }
    }

    pub async fn case_lookup(&self, case_id: &str) -> CaseResult<CaseDetails> {
        let case = provider_call("case registry", self.timeout, self.registry.get_case(case_id))
            .await?
            .ok_or_else(|| CaseError::not_found("case", case_id))?;
        let files = provider_call("case registry", self.timeout, self.registry.list_files(case_id)).await?;
        let tasks =
            provider_call("case registry", self.timeout, self.registry.list_tasks(Some(case_id))).await?;
        let chunks =
            provider_call("knowledge store", self.timeout, self.store.fetch_by_case(case_id)).await?;

        let mut by_doc: BTreeMap<&str, Vec<(u32, &str)>> = BTreeMap::new();
        for chunk in &chunks {
            by_doc
                .entry(chunk.metadata.doc_id())
                .or_default()
                .push((chunk.metadata.chunk_index(), chunk.text.as_str()));
        }

        let mut summary = ContentSummary {
            tasks: tasks.len(),
            total_chunks: chunks.len(),
            ..ContentSummary::default()
        };
        let mut grouped: BTreeMap<&'static str, Vec<FileView>> = BTreeMap::new();
        for record in files {
            match record.file_type {
                FileType::Document => summary.documents += 1,
                FileType::Audio => summary.audio += 1,
                FileType::Image => summary.images += 1,
            }
            let full = by_doc
                .remove(record.id.as_str())
                .map(reassemble)
                .unwrap_or_default();
            let (content, truncated) = truncate_chars(&full, MAX_CONTENT_CHARS);
            grouped
                .entry(record.file_type.as_str())
                .or_default()
                .push(FileView {
                    record,
                    content,
                    truncated,
                });
        }

        let mut by_priority: BTreeMap<&'static str, Vec<Task>> = BTreeMap::new();
        for task in tasks {
            by_priority.entry(task.priority.as_str()).or_default().push(task);
        }

        Ok(CaseDetails {
            case,
            files: grouped,
            tasks: by_priority,
            summary,
        })
    }

    pub async fn list_cases(&self, limit: usize, offset: usize) -> CaseResult<CaseListing> {
        let cases =
            provider_call("case registry", self.timeout, self.registry.list_cases(limit, offset)).await?;
        let mut overviews = Vec::with_capacity(cases.len());
        for case in cases {
            let files =
                provider_call("case registry", self.timeout, self.registry.list_files(&case.id)).await?;
            let tasks =
                provider_call("case registry", self.timeout, self.registry.list_tasks(Some(&case.id)))
                    .await?;
            let types: BTreeSet<&'static str> = files.iter().map(|f| f.file_type.as_str()).collect();
            overviews.push(CaseOverview {
                file_types: FileType::ALL
                    .into_iter()
                    .filter(|ft| types.contains(ft.as_str()))
                    .collect(),
                file_count: files.len(),
                task_count: tasks.len(),
                id: case.id,
                created_at: case.created_at,
            });
        }
        Ok(CaseListing {
            cases: overviews,
            limit,
            offset,
        })
    }

    pub async fn task_analysis(&self, case_id: Option<&str>) -> CaseResult<TaskAnalysis> {
        if let Some(id) = case_id {
            let exists = provider_call("case registry", self.timeout, self.registry.get_case(id)).await?;
            if exists.is_none() {
                return Err(CaseError::not_found("case", id));
            }
        }
        let tasks = provider_call("case registry", self.timeout, self.registry.list_tasks(case_id)).await?;
        Ok(analyze_tasks(case_id, &tasks))
    }
}

/// Totals by priority and category plus the first high-priority tasks.
pub fn analyze_tasks(case_id: Option<&str>, tasks: &[Task]) -> TaskAnalysis {
    let mut by_priority: BTreeMap<&'static str, usize> =
        TaskPriority::ALL.iter().map(|p| (p.as_str(), 0)).collect();
    let mut by_category: BTreeMap<&'static str, usize> =
        TaskCategory::ALL.iter().map(|c| (c.as_str(), 0)).collect();
    for task in tasks {
        *by_priority.entry(task.priority.as_str()).or_default() += 1;
        *by_category.entry(task.category.as_str()).or_default() += 1;
    }

    let high_priority = tasks
        .iter()
        .filter(|t| t.priority == TaskPriority::High)
        .take(MAX_HIGHLIGHTS)
        .map(|t| TaskHighlight {
            task_id: t.id.clone(),
            case_id: t.case_id.clone(),
            title: t.title.clone(),
            excerpt: truncate_chars(&t.description, EXCERPT_CHARS).0,
        })
        .collect();

    TaskAnalysis {
        case_id: case_id.map(str::to_string),
        total: tasks.len(),
        by_priority,
        by_category,
        high_priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_knowledge_core::models::TaskDraft;

    fn task(title: &str, priority: TaskPriority, category: TaskCategory, description: &str) -> Task {
        Task::from_draft(
            TaskDraft {
                title: title.to_string(),
                description: description.to_string(),
                priority,
                category,
                reasoning: String::new(),
            },
            "c1",
            vec![],
        )
    }

    #[test]
    fn truncation_appends_ellipsis_on_char_boundary() {
        assert_eq!(truncate_chars("short", 10), ("short".to_string(), false));
        let (cut, truncated) = truncate_chars("ééééé", 3);
        assert_eq!(cut, "ééé...");
        assert!(truncated);
    }

    #[test]
    fn analysis_counts_every_bucket() {
        let tasks = vec![
            task("Shore trench", TaskPriority::High, TaskCategory::Safety, "x"),
            task("File permit", TaskPriority::Low, TaskCategory::Compliance, "y"),
        ];
        let analysis = analyze_tasks(Some("c1"), &tasks);
        assert_eq!(analysis.total, 2);
        assert_eq!(analysis.by_priority["high"], 1);
        assert_eq!(analysis.by_priority["medium"], 0);
        assert_eq!(analysis.by_category["safety"], 1);
        assert_eq!(analysis.by_category["general"], 0);
        assert_eq!(analysis.high_priority.len(), 1);
        assert_eq!(analysis.high_priority[0].title, "Shore trench");
    }

    #[test]
    fn highlights_are_capped_and_excerpted() {
        let long = "a".repeat(250);
        let tasks: Vec<Task> = (0..7)
            .map(|i| task(&format!("T{}", i), TaskPriority::High, TaskCategory::Safety, &long))
            .collect();
        let analysis = analyze_tasks(None, &tasks);
        assert_eq!(analysis.high_priority.len(), MAX_HIGHLIGHTS);
        assert_eq!(analysis.high_priority[0].excerpt.chars().count(), EXCERPT_CHARS + 3);
        assert_eq!(analysis.high_priority[4].title, "T4");
    }
}
