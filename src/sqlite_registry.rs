//! SQLite-backed [`CaseRegistry`].
//!
//! Timestamps are stored as Unix milliseconds. Task provenance is stored
//! as a JSON array in `tasks.source_chunks`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use case_knowledge_core::models::{Case, FileRecord, FileType, Task, TaskCategory, TaskPriority};
use case_knowledge_core::registry::CaseRegistry;

pub struct SqliteCaseRegistry {
    pool: SqlitePool,
}

impl SqliteCaseRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_file(row: &SqliteRow) -> Result<FileRecord> {
    let file_type: String = row.get("file_type");
    Ok(FileRecord {
        id: row.get("id"),
        case_id: row.get("case_id"),
        file_type: FileType::parse(&file_type)
            .with_context(|| format!("Unknown file_type in registry: {}", file_type))?,
        original_filename: row.get("original_filename"),
        storage_path: row.get("storage_path"),
        mime_type: row.get("mime_type"),
        size: row.get("size"),
        url: row.get("url"),
        created_at: from_millis(row.get("created_at")),
    })
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let id: String = row.get("id");
    let source_chunks: String = row.get("source_chunks");
    let priority: String = row.get("priority");
    let category: String = row.get("category");
    Ok(Task {
        source_chunk_ids: serde_json::from_str(&source_chunks)
            .with_context(|| format!("Corrupt source_chunks for task {}", id))?,
        id,
        case_id: row.get("case_id"),
        title: row.get("title"),
        description: row.get("description"),
        priority: TaskPriority::parse_lenient(&priority),
        category: TaskCategory::parse_lenient(&category),
        reasoning: row.get("ai_reasoning"),
        created_at: from_millis(row.get("created_at")),
    })
}

const FILE_COLUMNS: &str =
    "id, case_id, file_type, original_filename, storage_path, mime_type, size, url, created_at";
const TASK_COLUMNS: &str =
    "id, case_id, title, description, priority, category, source_chunks, ai_reasoning, created_at";

#[async_trait]
impl CaseRegistry for SqliteCaseRegistry {
    async fn create_case(&self, case: &Case) -> Result<()> {
        sqlx::query("INSERT INTO cases (id, created_at) VALUES (?, ?)")
            .bind(&case.id)
            .bind(case.created_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_case(&self, case_id: &str) -> Result<Option<Case>> {
        let row = sqlx::query("SELECT id, created_at FROM cases WHERE id = ?")
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Case {
            id: r.get("id"),
            created_at: from_millis(r.get("created_at")),
        }))
    }

    async fn list_cases(&self, limit: usize, offset: usize) -> Result<Vec<Case>> {
        let rows = sqlx::query(
            "SELECT id, created_at FROM cases ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| Case {
                id: r.get("id"),
                created_at: from_millis(r.get("created_at")),
            })
            .collect())
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO files ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            FILE_COLUMNS
        ))
        .bind(&file.id)
        .bind(&file.case_id)
        .bind(file.file_type.as_str())
        .bind(&file.original_filename)
        .bind(&file.storage_path)
        .bind(&file.mime_type)
        .bind(file.size)
        .bind(&file.url)
        .bind(file.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM files WHERE id = ?", FILE_COLUMNS))
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_file).transpose()
    }

    async fn list_files(&self, case_id: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE case_id = ? ORDER BY created_at ASC, id ASC",
            FILE_COLUMNS
        ))
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_file).collect()
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<()> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        for task in tasks {
            sqlx::query(&format!(
                "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TASK_COLUMNS
            ))
            .bind(&task.id)
            .bind(&task.case_id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.priority.as_str())
            .bind(task.category.as_str())
            .bind(serde_json::to_string(&task.source_chunk_ids)?)
            .bind(&task.reasoning)
            .bind(task.created_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_tasks(&self, case_id: Option<&str>) -> Result<Vec<Task>> {
        let rows = match case_id {
            Some(id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM tasks WHERE case_id = ? ORDER BY created_at ASC, id ASC",
                    TASK_COLUMNS
                ))
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM tasks ORDER BY created_at ASC, id ASC",
                    TASK_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_task).collect()
    }

    async fn delete_tasks_by_case(&self, case_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE case_id = ?")
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_files_by_case(&self, case_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM files WHERE case_id = ?")
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_case(&self, case_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cases WHERE id = ?")
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
