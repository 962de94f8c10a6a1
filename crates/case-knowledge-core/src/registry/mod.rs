//! Case Registry abstraction: relational CRUD over cases, files and tasks.
//!
//! Files and tasks reference their case by foreign key. Backends must
//! refuse to insert children of a missing case and refuse to delete a
//! case that still has children, which is why the lifecycle coordinator
//! deletes tasks, then files, then the case.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Case, FileRecord, Task};

#[async_trait]
pub trait CaseRegistry: Send + Sync {
    async fn create_case(&self, case: &Case) -> Result<()>;

    async fn get_case(&self, case_id: &str) -> Result<Option<Case>>;

    /// Cases newest first.
    async fn list_cases(&self, limit: usize, offset: usize) -> Result<Vec<Case>>;

    async fn insert_file(&self, file: &FileRecord) -> Result<()>;

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>>;

    /// Files of one case, oldest first.
    async fn list_files(&self, case_id: &str) -> Result<Vec<FileRecord>>;

    /// Inserts all tasks or none.
    async fn insert_tasks(&self, tasks: &[Task]) -> Result<()>;

    /// Tasks of one case, or of every case when `case_id` is `None`.
    async fn list_tasks(&self, case_id: Option<&str>) -> Result<Vec<Task>>;

    async fn delete_tasks_by_case(&self, case_id: &str) -> Result<u64>;

    async fn delete_files_by_case(&self, case_id: &str) -> Result<u64>;

    /// Deletes the case row; fails while files or tasks still reference it.
    async fn delete_case(&self, case_id: &str) -> Result<u64>;
}
