use crate::core::{GraphNode, Issue, IssuePatch, Task};
use crate::error::Result;
use crate::workflow::RunMetadata;
use async_trait::async_trait;
use std::path::Path;

/// Directory under the work dir that holds run state.
pub const DEFAULT_STATE_DIR: &str = ".remedy";

/// Load and save stage outputs for a work directory.
///
/// Loading a document that was never written yields an empty value, not an
/// error.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_tasks(&self, work_dir: &Path) -> Result<Vec<Task>>;

    async fn save_tasks(&self, work_dir: &Path, tasks: &[Task]) -> Result<()>;

    async fn load_issues(&self, work_dir: &Path) -> Result<Vec<Issue>>;

    async fn save_issues(&self, work_dir: &Path, issues: &[Issue]) -> Result<()>;

    /// Apply `patch` to the issue with `id` and return the updated issue.
    ///
    /// # Errors
    /// `Error::IssueNotFound` if no issue has that id.
    async fn update_issue(&self, work_dir: &Path, id: &str, patch: &IssuePatch) -> Result<Issue>;

    async fn load_graph(&self, work_dir: &Path) -> Result<Vec<GraphNode>>;

    async fn save_graph(&self, work_dir: &Path, nodes: &[GraphNode]) -> Result<()>;

    async fn load_run(&self, work_dir: &Path) -> Result<Option<RunMetadata>>;

    async fn save_run(&self, work_dir: &Path, run: &RunMetadata) -> Result<()>;
}
