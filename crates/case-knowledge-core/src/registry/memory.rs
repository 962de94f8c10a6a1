//! In-memory [`CaseRegistry`] for tests.
//!
//! Enforces the same foreign-key rules as the SQLite registry and can be
//! told to fail individual operations, which is how cascade-delete
//! reporting is exercised.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Case, FileRecord, Task};

use super::CaseRegistry;

#[derive(Default)]
struct Tables {
    cases: Vec<Case>,
    files: Vec<FileRecord>,
    tasks: Vec<Task>,
}

pub struct InMemoryCaseRegistry {
    tables: RwLock<Tables>,
    failing: Mutex<HashSet<&'static str>>,
}

impl InMemoryCaseRegistry {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every later call to `operation` (a trait method name) fail.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Number of file and task rows still referencing `case_id`.
    pub fn child_rows(&self, case_id: &str) -> usize {
        let t = self.tables.read().unwrap();
        t.files.iter().filter(|f| f.case_id == case_id).count()
            + t.tasks.iter().filter(|x| x.case_id == case_id).count()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failing.lock().unwrap().contains(operation) {
            bail!("registry unavailable during {}", operation);
        }
        Ok(())
    }
}

impl Default for InMemoryCaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaseRegistry for InMemoryCaseRegistry {
    async fn create_case(&self, case: &Case) -> Result<()> {
        self.check("create_case")?;
        let mut t = self.tables.write().unwrap();
        if t.cases.iter().any(|c| c.id == case.id) {
            bail!("UNIQUE constraint failed: cases.id");
        }
        t.cases.push(case.clone());
        Ok(())
    }

    async fn get_case(&self, case_id: &str) -> Result<Option<Case>> {
        self.check("get_case")?;
        let t = self.tables.read().unwrap();
        Ok(t.cases.iter().find(|c| c.id == case_id).cloned())
    }

    async fn list_cases(&self, limit: usize, offset: usize) -> Result<Vec<Case>> {
        self.check("list_cases")?;
        let t = self.tables.read().unwrap();
        let mut cases = t.cases.clone();
        cases.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(cases.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<()> {
        self.check("insert_file")?;
        let mut t = self.tables.write().unwrap();
        if !t.cases.iter().any(|c| c.id == file.case_id) {
            bail!("FOREIGN KEY constraint failed: files.case_id");
        }
        t.files.retain(|f| f.id != file.id);
        t.files.push(file.clone());
        Ok(())
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        self.check("get_file")?;
        let t = self.tables.read().unwrap();
        Ok(t.files.iter().find(|f| f.id == file_id).cloned())
    }

    async fn list_files(&self, case_id: &str) -> Result<Vec<FileRecord>> {
        self.check("list_files")?;
        let t = self.tables.read().unwrap();
        Ok(t.files
            .iter()
            .filter(|f| f.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<()> {
        self.check("insert_tasks")?;
        let mut t = self.tables.write().unwrap();
        if let Some(orphan) = tasks
            .iter()
            .find(|task| !t.cases.iter().any(|c| c.id == task.case_id))
        {
            bail!(
                "FOREIGN KEY constraint failed: tasks.case_id ({})",
                orphan.case_id
            );
        }
        t.tasks.extend(tasks.iter().cloned());
        Ok(())
    }

    async fn list_tasks(&self, case_id: Option<&str>) -> Result<Vec<Task>> {
        self.check("list_tasks")?;
        let t = self.tables.read().unwrap();
        Ok(t.tasks
            .iter()
            .filter(|task| case_id.map_or(true, |id| task.case_id == id))
            .cloned()
            .collect())
    }

    async fn delete_tasks_by_case(&self, case_id: &str) -> Result<u64> {
        self.check("delete_tasks_by_case")?;
        let mut t = self.tables.write().unwrap();
        let before = t.tasks.len();
        t.tasks.retain(|task| task.case_id != case_id);
        Ok((before - t.tasks.len()) as u64)
    }

    async fn delete_files_by_case(&self, case_id: &str) -> Result<u64> {
        self.check("delete_files_by_case")?;
        let mut t = self.tables.write().unwrap();
        let before = t.files.len();
        t.files.retain(|f| f.case_id != case_id);
        Ok((before - t.files.len()) as u64)
    }

    async fn delete_case(&self, case_id: &str) -> Result<u64> {
        self.check("delete_case")?;
        let mut t = self.tables.write().unwrap();
        if t.files.iter().any(|f| f.case_id == case_id)
            || t.tasks.iter().any(|task| task.case_id == case_id)
        {
            bail!("FOREIGN KEY constraint failed: case {} still has children", case_id);
        }
        let before = t.cases.len();
        t.cases.retain(|c| c.id != case_id);
        Ok((before - t.cases.len()) as u64)
    }
}
