//! Remote tracker integrations
//!
//! Two remote stores are modeled, each behind a trait so the sync engine can
//! run against real services or in-memory fakes:
//!
//! - [`IssueTracker`]: the issue source (GitHub REST)
//! - [`TaskTracker`]: the task target (Asana, over the `asana` client crate)
//!
//! Adapters hide pagination and authentication. Idempotent reads are retried
//! with backoff; writes are attempted exactly once.

pub mod asana;
pub mod github;
pub mod memory;
pub mod retry;

use crate::model::{
    Comment, Hook, Issue, IssueStateFilter, NewTask, Project, RepoRef, Story, Task, TaskDiff,
    Workspace,
};
use crate::Result;
use async_trait::async_trait;

pub use self::asana::AsanaAdapter;
pub use self::github::GitHubAdapter;
pub use self::memory::{MemoryIssueTracker, MemoryTaskTracker};
pub use self::retry::{with_retry, RetryConfig, RetryDecision, RetryableError};

/// Operations the sync engine needs from the issue tracker
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Every issue in `repo` assigned to `assignee` in the given state
    async fn list_issues(
        &self,
        repo: &RepoRef,
        assignee: &str,
        state: IssueStateFilter,
    ) -> Result<Vec<Issue>>;

    /// Every comment on an issue
    async fn list_comments(&self, issue: &Issue) -> Result<Vec<Comment>>;

    /// Register a hook delivering `events` to `url`
    ///
    /// Fails with [`crate::HashiError::HookExists`] when the repository already
    /// has a hook for that url.
    async fn create_webhook(&self, repo: &RepoRef, events: &[&str], url: &str) -> Result<Hook>;

    async fn delete_webhook(&self, repo: &RepoRef, hook_id: u64) -> Result<()>;

    async fn list_webhooks(&self, repo: &RepoRef) -> Result<Vec<Hook>>;
}

/// Operations the sync engine needs from the task tracker
#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>>;

    async fn list_projects(&self, workspace: &Workspace) -> Result<Vec<Project>>;

    async fn list_tasks(&self, project: &Project) -> Result<Vec<Task>>;

    /// Create a task; application-level refusals surface as
    /// [`crate::HashiError::TaskRejected`]
    async fn create_task(&self, task: &NewTask) -> Result<Task>;

    /// Write only the fields staged in `diff`
    async fn update_task(&self, task: &Task, diff: &TaskDiff) -> Result<Task>;

    async fn list_stories(&self, task: &Task) -> Result<Vec<Story>>;
}
