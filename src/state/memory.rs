//! In-memory state store.

use crate::core::{GraphNode, Issue, IssuePatch, Task};
use crate::error::{Error, Result};
use crate::state::store::StateStore;
use crate::workflow::RunMetadata;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Documents {
    tasks: Vec<Task>,
    issues: Vec<Issue>,
    graph: Vec<GraphNode>,
    run: Option<RunMetadata>,
}

/// Keeps documents in memory, keyed by work directory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    documents: RwLock<HashMap<PathBuf, Documents>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read<T>(&self, work_dir: &Path, f: impl FnOnce(&Documents) -> T) -> T {
        let documents = self.documents.read().await;
        match documents.get(work_dir) {
            Some(docs) => f(docs),
            None => f(&Documents::default()),
        }
    }

    async fn write<T>(&self, work_dir: &Path, f: impl FnOnce(&mut Documents) -> T) -> T {
        let mut documents = self.documents.write().await;
        f(documents.entry(work_dir.to_path_buf()).or_default())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_tasks(&self, work_dir: &Path) -> Result<Vec<Task>> {
        Ok(self.read(work_dir, |d| d.tasks.clone()).await)
    }

    async fn save_tasks(&self, work_dir: &Path, tasks: &[Task]) -> Result<()> {
        self.write(work_dir, |d| d.tasks = tasks.to_vec()).await;
        Ok(())
    }

    async fn load_issues(&self, work_dir: &Path) -> Result<Vec<Issue>> {
        Ok(self.read(work_dir, |d| d.issues.clone()).await)
    }

    async fn save_issues(&self, work_dir: &Path, issues: &[Issue]) -> Result<()> {
        self.write(work_dir, |d| d.issues = issues.to_vec()).await;
        Ok(())
    }

    async fn update_issue(&self, work_dir: &Path, id: &str, patch: &IssuePatch) -> Result<Issue> {
        self.write(work_dir, |d| {
            let issue = d
                .issues
                .iter_mut()
                .find(|issue| issue.id == id)
                .ok_or_else(|| Error::IssueNotFound(id.to_string()))?;
            issue.apply(patch);
            Ok(issue.clone())
        })
        .await
    }

    async fn load_graph(&self, work_dir: &Path) -> Result<Vec<GraphNode>> {
        Ok(self.read(work_dir, |d| d.graph.clone()).await)
    }

    async fn save_graph(&self, work_dir: &Path, nodes: &[GraphNode]) -> Result<()> {
        self.write(work_dir, |d| d.graph = nodes.to_vec()).await;
        Ok(())
    }

    async fn load_run(&self, work_dir: &Path) -> Result<Option<RunMetadata>> {
        Ok(self.read(work_dir, |d| d.run.clone()).await)
    }

    async fn save_run(&self, work_dir: &Path, run: &RunMetadata) -> Result<()> {
        self.write(work_dir, |d| d.run = Some(run.clone())).await;
        Ok(())
    }
}
