//! In-memory tracker implementations
//!
//! Both fakes keep their records in plain collections behind a mutex and can
//! be told to stall or fail, which is how the sync engine is exercised without
//! a network. Listing delays use tokio's clock, so paused-time tests control
//! exactly when each fetch completes.

use super::{IssueTracker, TaskTracker};
use crate::model::{
    Comment, Hook, Issue, IssueState, IssueStateFilter, NewTask, Project, RepoRef, Story, Task,
    TaskDiff, Workspace,
};
use crate::{HashiError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct TaskStore {
    workspaces: Vec<Workspace>,
    projects: Vec<Project>,
    tasks: Vec<Task>,
    stories: Vec<Story>,
    next_id: u64,
    listing_delay: Duration,
    write_delay: Duration,
    fail_workspaces: bool,
    rejected_names: HashSet<String>,
    creates: usize,
    updates: Vec<TaskDiff>,
    first_write_at: Option<Instant>,
}

/// Task tracker kept in memory
#[derive(Default)]
pub struct MemoryTaskTracker {
    state: Mutex<TaskStore>,
}

impl MemoryTaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_workspace(&self, workspace: Workspace) {
        lock(&self.state).workspaces.push(workspace);
    }

    pub fn add_project(&self, project: Project) {
        lock(&self.state).projects.push(project);
    }

    /// Insert or replace a task by id
    pub fn put_task(&self, task: Task) {
        let mut state = lock(&self.state);
        state.tasks.retain(|t| t.id != task.id);
        state.tasks.push(task);
    }

    pub fn add_story(&self, story: Story) {
        lock(&self.state).stories.push(story);
    }

    /// Stall the workspace listing (the first fetch of a population pass)
    pub fn set_listing_delay(&self, delay: Duration) {
        lock(&self.state).listing_delay = delay;
    }

    /// Stall every create and update before it touches the store
    pub fn set_write_delay(&self, delay: Duration) {
        lock(&self.state).write_delay = delay;
    }

    pub fn fail_workspace_listing(&self) {
        lock(&self.state).fail_workspaces = true;
    }

    /// Refuse creation of tasks with this name
    pub fn reject_task_named(&self, name: impl Into<String>) {
        lock(&self.state).rejected_names.insert(name.into());
    }

    pub fn tasks(&self) -> Vec<Task> {
        lock(&self.state).tasks.clone()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        lock(&self.state).tasks.iter().find(|t| t.id == id).cloned()
    }

    pub fn create_calls(&self) -> usize {
        lock(&self.state).creates
    }

    /// Every diff sent through `update_task`, in order
    pub fn update_calls(&self) -> Vec<TaskDiff> {
        lock(&self.state).updates.clone()
    }

    /// When the first create or update arrived
    pub fn first_write_at(&self) -> Option<Instant> {
        lock(&self.state).first_write_at
    }

    async fn stall_write(&self) {
        let delay = lock(&self.state).write_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn record_write(state: &mut TaskStore) {
        if state.first_write_at.is_none() {
            state.first_write_at = Some(Instant::now());
        }
    }
}

#[async_trait]
impl TaskTracker for MemoryTaskTracker {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let delay = lock(&self.state).listing_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let state = lock(&self.state);
        if state.fail_workspaces {
            return Err(HashiError::Network("workspace listing unavailable".to_string()));
        }
        Ok(state.workspaces.clone())
    }

    async fn list_projects(&self, workspace: &Workspace) -> Result<Vec<Project>> {
        Ok(lock(&self.state)
            .projects
            .iter()
            .filter(|p| p.workspace.as_ref().map(|w| w.id.as_str()) == Some(workspace.id.as_str()))
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, project: &Project) -> Result<Vec<Task>> {
        Ok(lock(&self.state)
            .tasks
            .iter()
            .filter(|t| t.projects.iter().any(|p| p.id == project.id))
            .cloned()
            .collect())
    }

    async fn create_task(&self, new: &NewTask) -> Result<Task> {
        self.stall_write().await;
        let mut state = lock(&self.state);
        if state.rejected_names.contains(&new.name) {
            return Err(HashiError::TaskRejected {
                task: new.name.clone(),
                message: "name: invalid value".to_string(),
            });
        }

        state.next_id += 1;
        let id = format!("{}", 1000 + state.next_id);
        let mut task = Task::new(id, &new.name)
            .with_notes(&new.notes)
            .with_completed(new.completed)
            .in_workspace(new.workspace.clone());
        task.projects = new.projects.clone();
        task.assignee_status = Some(new.assignee_status.clone());
        task.created_at = Some(Utc::now());
        task.modified_at = task.created_at;

        state.creates += 1;
        Self::record_write(&mut state);
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task(&self, current: &Task, diff: &TaskDiff) -> Result<Task> {
        self.stall_write().await;
        let mut state = lock(&self.state);
        state.updates.push(diff.clone());
        Self::record_write(&mut state);

        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == current.id)
            .ok_or_else(|| HashiError::TaskRejected {
                task: current.id.clone(),
                message: "Unknown object".to_string(),
            })?;
        diff.apply(task);
        task.modified_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn list_stories(&self, task: &Task) -> Result<Vec<Story>> {
        Ok(lock(&self.state)
            .stories
            .iter()
            .filter(|s| s.task_id == task.id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct IssueStore {
    issues: Vec<Issue>,
    comments: Vec<Comment>,
    hooks: Vec<Hook>,
    next_hook_id: u64,
    hook_creates: usize,
    listing_delay: Duration,
    failing_repos: HashSet<RepoRef>,
    failing_hook_repos: HashSet<RepoRef>,
}

/// Issue tracker kept in memory
#[derive(Default)]
pub struct MemoryIssueTracker {
    state: Mutex<IssueStore>,
}

impl MemoryIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an issue by id
    pub fn put_issue(&self, issue: Issue) {
        let mut state = lock(&self.state);
        state.issues.retain(|i| i.id != issue.id);
        state.issues.push(issue);
    }

    pub fn close_issue(&self, repo: &RepoRef, number: u64, closed_at: DateTime<Utc>) {
        let mut state = lock(&self.state);
        if let Some(issue) = state
            .issues
            .iter_mut()
            .find(|i| &i.repo == repo && i.number == number)
        {
            issue.state = IssueState::Closed;
            issue.closed_at = Some(closed_at);
        }
    }

    pub fn add_comment(&self, comment: Comment) {
        lock(&self.state).comments.push(comment);
    }

    /// Pre-register a hook, as if created outside this service
    pub fn add_hook(&self, hook: Hook) {
        let mut state = lock(&self.state);
        state.next_hook_id = state.next_hook_id.max(hook.id);
        state.hooks.push(hook);
    }

    pub fn set_listing_delay(&self, delay: Duration) {
        lock(&self.state).listing_delay = delay;
    }

    /// Make issue listing for `repo` fail with a transport error
    pub fn fail_repo(&self, repo: RepoRef) {
        lock(&self.state).failing_repos.insert(repo);
    }

    /// Make hook creation for `repo` fail with a server error
    pub fn fail_hooks_for(&self, repo: RepoRef) {
        lock(&self.state).failing_hook_repos.insert(repo);
    }

    pub fn hooks(&self) -> Vec<Hook> {
        lock(&self.state).hooks.clone()
    }

    pub fn hook_create_calls(&self) -> usize {
        lock(&self.state).hook_creates
    }
}

#[async_trait]
impl IssueTracker for MemoryIssueTracker {
    async fn list_issues(
        &self,
        repo: &RepoRef,
        assignee: &str,
        state_filter: IssueStateFilter,
    ) -> Result<Vec<Issue>> {
        let delay = lock(&self.state).listing_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let state = lock(&self.state);
        if state.failing_repos.contains(repo) {
            return Err(HashiError::Network(format!("{} unreachable", repo)));
        }

        Ok(state
            .issues
            .iter()
            .filter(|i| &i.repo == repo && i.assignee_login() == Some(assignee))
            .filter(|i| match state_filter {
                IssueStateFilter::All => true,
                IssueStateFilter::Open => !i.is_closed(),
                IssueStateFilter::Closed => i.is_closed(),
            })
            .cloned()
            .collect())
    }

    async fn list_comments(&self, issue: &Issue) -> Result<Vec<Comment>> {
        Ok(lock(&self.state)
            .comments
            .iter()
            .filter(|c| c.repo == issue.repo && c.issue_number == issue.number)
            .cloned()
            .collect())
    }

    async fn create_webhook(&self, repo: &RepoRef, events: &[&str], url: &str) -> Result<Hook> {
        let mut state = lock(&self.state);
        state.hook_creates += 1;

        if state.failing_hook_repos.contains(repo) {
            return Err(HashiError::Remote {
                service: "GitHub".to_string(),
                status: 500,
                message: "Internal Server Error".to_string(),
            });
        }
        if state.hooks.iter().any(|h| &h.repo == repo && h.url == url) {
            return Err(HashiError::HookExists {
                repo: repo.to_string(),
            });
        }

        state.next_hook_id += 1;
        let hook = Hook {
            id: state.next_hook_id,
            repo: repo.clone(),
            url: url.to_string(),
            events: events.iter().map(|e| e.to_string()).collect(),
            active: true,
            created_at: Some(Utc::now()),
        };
        state.hooks.push(hook.clone());
        Ok(hook)
    }

    async fn delete_webhook(&self, repo: &RepoRef, hook_id: u64) -> Result<()> {
        let mut state = lock(&self.state);
        let before = state.hooks.len();
        state.hooks.retain(|h| !(&h.repo == repo && h.id == hook_id));
        if state.hooks.len() == before {
            return Err(HashiError::Remote {
                service: "GitHub".to_string(),
                status: 404,
                message: "Not Found".to_string(),
            });
        }
        Ok(())
    }

    async fn list_webhooks(&self, repo: &RepoRef) -> Result<Vec<Hook>> {
        Ok(lock(&self.state)
            .hooks
            .iter()
            .filter(|h| &h.repo == repo)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Reference, User};

    #[tokio::test]
    async fn test_task_create_and_update() {
        let tracker = MemoryTaskTracker::new();
        let created = tracker
            .create_task(&NewTask {
                name: "Fix crash".to_string(),
                notes: "(GH 42)".to_string(),
                completed: false,
                assignee_status: "inbox".to_string(),
                projects: vec![Reference::new("10")],
                workspace: Reference::new("1"),
            })
            .await
            .unwrap();
        assert_eq!(tracker.create_calls(), 1);

        let diff = TaskDiff {
            completed: Some(true),
            ..Default::default()
        };
        let updated = tracker.update_task(&created, &diff).await.unwrap();
        assert!(updated.completed);
        assert_eq!(tracker.update_calls(), vec![diff]);
    }

    #[tokio::test]
    async fn test_duplicate_hook_is_reported() {
        let tracker = MemoryIssueTracker::new();
        let repo = RepoRef::new("acme", "widgets");

        tracker.create_webhook(&repo, &["issues"], "http://x/webhook").await.unwrap();
        let second = tracker.create_webhook(&repo, &["issues"], "http://x/webhook").await;
        assert!(matches!(second, Err(HashiError::HookExists { .. })));
        assert_eq!(tracker.hooks().len(), 1);
    }

    #[tokio::test]
    async fn test_issue_listing_filters() {
        let tracker = MemoryIssueTracker::new();
        let repo = RepoRef::new("acme", "widgets");
        tracker.put_issue(
            Issue::new(1, 1, "mine", repo.clone()).with_assignee(User::new("alice", 7)),
        );
        tracker.put_issue(Issue::new(2, 2, "theirs", repo.clone()).with_assignee(User::new("bob", 8)));
        tracker.close_issue(&repo, 1, Utc::now());

        let all = tracker.list_issues(&repo, "alice", IssueStateFilter::All).await.unwrap();
        assert_eq!(all.len(), 1);
        let open = tracker.list_issues(&repo, "alice", IssueStateFilter::Open).await.unwrap();
        assert!(open.is_empty());
    }
}
