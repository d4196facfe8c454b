//! JSON-file state store.

use crate::core::{GraphNode, Issue, IssuePatch, Task};
use crate::error::{Error, Result};
use crate::rlog_debug;
use crate::state::store::{StateStore, DEFAULT_STATE_DIR};
use crate::workflow::RunMetadata;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

const TASKS_FILE: &str = "tasks.json";
const ISSUES_FILE: &str = "issues.json";
const GRAPH_FILE: &str = "graph.json";
const RUN_FILE: &str = "run.json";

/// Stores each document as pretty JSON under `<work_dir>/<state_dir>/`.
///
/// Writes go through a uniquely named temp file and a rename, so a reader
/// never sees a half-written document. Issue updates are serialized per
/// store instance.
#[derive(Debug)]
pub struct FileStateStore {
    state_dir: String,
    issue_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(state_dir: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            issue_lock: Mutex::new(()),
        }
    }

    /// Directory holding the documents for `work_dir`.
    pub fn state_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.state_dir)
    }

    fn document(&self, work_dir: &Path, name: &str) -> PathBuf {
        self.state_path(work_dir).join(name)
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(value)?;
        // One temp file per write; concurrent writers never share it.
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        rlog_debug!("state: wrote {}", path.display());
        Ok(())
    }
}

impl Default for FileStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_tasks(&self, work_dir: &Path) -> Result<Vec<Task>> {
        let path = self.document(work_dir, TASKS_FILE);
        Ok(self.read(&path).await?.unwrap_or_default())
    }

    async fn save_tasks(&self, work_dir: &Path, tasks: &[Task]) -> Result<()> {
        self.write(&self.document(work_dir, TASKS_FILE), tasks).await
    }

    async fn load_issues(&self, work_dir: &Path) -> Result<Vec<Issue>> {
        let path = self.document(work_dir, ISSUES_FILE);
        Ok(self.read(&path).await?.unwrap_or_default())
    }

    async fn save_issues(&self, work_dir: &Path, issues: &[Issue]) -> Result<()> {
        let _guard = self.issue_lock.lock().await;
        self.write(&self.document(work_dir, ISSUES_FILE), issues).await
    }

    async fn update_issue(&self, work_dir: &Path, id: &str, patch: &IssuePatch) -> Result<Issue> {
        let _guard = self.issue_lock.lock().await;
        let path = self.document(work_dir, ISSUES_FILE);
        let mut issues: Vec<Issue> = self.read(&path).await?.unwrap_or_default();
        let issue = issues
            .iter_mut()
            .find(|issue| issue.id == id)
            .ok_or_else(|| Error::IssueNotFound(id.to_string()))?;
        issue.apply(patch);
        let updated = issue.clone();
        self.write(&path, &issues).await?;
        Ok(updated)
    }

    async fn load_graph(&self, work_dir: &Path) -> Result<Vec<GraphNode>> {
        let path = self.document(work_dir, GRAPH_FILE);
        Ok(self.read(&path).await?.unwrap_or_default())
    }

    async fn save_graph(&self, work_dir: &Path, nodes: &[GraphNode]) -> Result<()> {
        self.write(&self.document(work_dir, GRAPH_FILE), nodes).await
    }

    async fn load_run(&self, work_dir: &Path) -> Result<Option<RunMetadata>> {
        self.read(&self.document(work_dir, RUN_FILE)).await
    }

    async fn save_run(&self, work_dir: &Path, run: &RunMetadata) -> Result<()> {
        self.write(&self.document(work_dir, RUN_FILE), run).await
    }
}
