//! Compare-and-converge for a single issue
//!
//! For each issue the reconciler finds the linked task and either creates
//! one, writes the fields that differ, or does nothing. The mirrored task
//! reflects every successful write before `reconcile` returns.

use super::linker::IdentityLinker;
use super::locks::IssueLocks;
use super::metrics;
use crate::integrations::TaskTracker;
use crate::mirror::Mirror;
use crate::model::{Issue, NewTask, Reference, Task, TaskDiff, TaskField};
use crate::{HashiError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Assignee status given to freshly created tasks
const NEW_TASK_STATUS: &str = "inbox";

/// What reconciling one issue did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    Created(Task),
    Updated { task: Task, changed: Vec<TaskField> },
    NoOp { task_id: String },
}

impl ReconcileAction {
    /// Metric/report label
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileAction::Created(_) => "created",
            ReconcileAction::Updated { .. } => "updated",
            ReconcileAction::NoOp { .. } => "noop",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            ReconcileAction::Created(task) | ReconcileAction::Updated { task, .. } => &task.id,
            ReconcileAction::NoOp { task_id } => task_id,
        }
    }
}

/// Task to create for an issue with no linked task
///
/// Fails with [`HashiError::Unresolved`] when the issue has no target
/// project/workspace stamped on it.
pub fn new_task_for(issue: &Issue) -> Result<NewTask> {
    let (project, workspace) = match (&issue.p_id, &issue.w_id) {
        (Some(p), Some(w)) => (p, w),
        _ => return Err(HashiError::Unresolved(issue.key())),
    };

    Ok(NewTask {
        name: issue.title.clone(),
        notes: issue.task_notes(),
        completed: false,
        assignee_status: NEW_TASK_STATUS.to_string(),
        projects: vec![Reference::new(project)],
        workspace: Reference::new(workspace),
    })
}

/// Fields of `task` that must change to match `issue`
///
/// Completion only flows one way: a closed issue completes its task, but a
/// reopened issue never un-completes it.
pub fn diff(issue: &Issue, task: &Task) -> TaskDiff {
    let mut diff = TaskDiff::default();

    if issue.title != task.name {
        diff.name = Some(issue.title.clone());
    }

    if issue.is_closed() && !task.completed {
        diff.completed = Some(true);
        diff.completed_at = issue.closed_at;
    }

    let notes = issue.task_notes();
    if notes != task.notes {
        diff.notes = Some(notes);
    }

    diff
}

pub struct Reconciler {
    tasks: Arc<dyn TaskTracker>,
    mirror: Mirror,
    linker: IdentityLinker,
    locks: IssueLocks,
}

impl Reconciler {
    pub fn new(tasks: Arc<dyn TaskTracker>, mirror: Mirror) -> Self {
        Self {
            tasks,
            linker: IdentityLinker::new(mirror.clone()),
            mirror,
            locks: IssueLocks::new(),
        }
    }

    /// Share a lock table with other reconcilers in the process
    pub fn with_locks(mut self, locks: IssueLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Bring the linked task in line with `issue`
    pub async fn reconcile(&self, issue: &Issue) -> Result<ReconcileAction> {
        let _guard = self.locks.acquire(&issue.key()).await;

        let result = match self.linker.find_linked_task(issue)? {
            None => self.create(issue).await,
            Some(task) => self.update(issue, task).await,
        };

        match &result {
            Ok(action) => metrics::record_reconcile(action.kind()),
            Err(e) => {
                metrics::record_reconcile("error");
                warn!(issue = %issue.key(), error = %e, "Reconcile failed");
            }
        }
        result
    }

    async fn create(&self, issue: &Issue) -> Result<ReconcileAction> {
        let new = new_task_for(issue)?;
        let task = self.tasks.create_task(&new).await?;

        self.mirror.upsert(&task)?;
        info!(issue = %issue.key(), task = %task.id, "Created task for issue");
        Ok(ReconcileAction::Created(task))
    }

    async fn update(&self, issue: &Issue, current: Task) -> Result<ReconcileAction> {
        let staged = diff(issue, &current);
        if staged.is_empty() {
            debug!(issue = %issue.key(), task = %current.id, "Task already in sync");
            return Ok(ReconcileAction::NoOp {
                task_id: current.id,
            });
        }

        let mut confirmed = self.tasks.update_task(&current, &staged).await?;
        staged.apply(&mut confirmed);
        confirmed.backfill_membership(&current.projects, current.workspace.as_ref());
        self.mirror.upsert(&confirmed)?;

        let changed = staged.changed_fields();
        info!(
            issue = %issue.key(),
            task = %confirmed.id,
            fields = ?changed,
            "Updated task from issue"
        );
        Ok(ReconcileAction::Updated {
            task: confirmed,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MemoryTaskTracker;
    use crate::model::RepoRef;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn issue() -> Issue {
        Issue::new(9001, 42, "Fix crash", RepoRef::new("acme", "widgets"))
            .with_body("NPE on load")
            .with_target("10", "1")
    }

    fn linked_task(issue: &Issue) -> Task {
        Task::new("1001", &issue.title).with_notes(issue.task_notes())
    }

    #[test]
    fn test_new_task_shape() {
        let new = new_task_for(&issue()).unwrap();
        assert_eq!(new.name, "Fix crash");
        assert_eq!(
            new.notes,
            "(GH 42)\nNPE on load\nhttps://github.com/acme/widgets/issues/42"
        );
        assert!(!new.completed);
        assert_eq!(new.assignee_status, "inbox");
        assert_eq!(new.projects, vec![Reference::new("10")]);
        assert_eq!(new.workspace, Reference::new("1"));
    }

    #[test]
    fn test_unresolved_issue_cannot_be_created() {
        let bare = Issue::new(1, 1, "t", RepoRef::new("a", "b"));
        assert!(matches!(new_task_for(&bare), Err(HashiError::Unresolved(_))));
    }

    #[test]
    fn test_in_sync_task_has_empty_diff() {
        let issue = issue();
        assert!(diff(&issue, &linked_task(&issue)).is_empty());
    }

    #[test]
    fn test_title_change_stages_only_name() {
        let issue = issue();
        let task = linked_task(&issue);
        let renamed = Issue {
            title: "Fix crash on load".to_string(),
            ..issue
        };

        let staged = diff(&renamed, &task);
        assert_eq!(staged.changed_fields(), vec![TaskField::Name]);
        assert_eq!(staged.name.as_deref(), Some("Fix crash on load"));
    }

    #[test]
    fn test_close_stages_completion() {
        let closed_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let issue = issue();
        let task = linked_task(&issue);

        let staged = diff(&issue.closed(closed_at), &task);
        assert_eq!(
            staged.changed_fields(),
            vec![TaskField::Completed, TaskField::CompletedAt]
        );
        assert_eq!(staged.completed_at, Some(closed_at));
    }

    #[test]
    fn test_open_issue_never_uncompletes() {
        let issue = issue();
        let task = linked_task(&issue).with_completed(true);
        assert!(diff(&issue, &task).is_empty());
    }

    #[test]
    fn test_body_change_stages_notes() {
        let issue = issue();
        let task = linked_task(&issue);
        let edited = issue.with_body("NPE on load and on save");

        let staged = diff(&edited, &task);
        assert_eq!(staged.changed_fields(), vec![TaskField::Notes]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_locks_serialize_concurrent_creates() {
        let tasks = Arc::new(MemoryTaskTracker::new());
        tasks.set_write_delay(Duration::from_secs(2));
        let mirror = Mirror::in_memory().unwrap();
        let locks = IssueLocks::new();
        let poll = Reconciler::new(tasks.clone(), mirror.clone()).with_locks(locks.clone());
        let delivery = Reconciler::new(tasks.clone(), mirror).with_locks(locks);

        let issue = issue();
        let (first, second) = tokio::join!(poll.reconcile(&issue), delivery.reconcile(&issue));

        let mut kinds = vec![first.unwrap().kind(), second.unwrap().kind()];
        kinds.sort();
        assert_eq!(kinds, vec!["created", "noop"]);
        assert_eq!(tasks.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_locks_duplicate_concurrent_creates() {
        let tasks = Arc::new(MemoryTaskTracker::new());
        tasks.set_write_delay(Duration::from_secs(2));
        let mirror = Mirror::in_memory().unwrap();
        let poll = Reconciler::new(tasks.clone(), mirror.clone());
        let delivery = Reconciler::new(tasks.clone(), mirror);

        let issue = issue();
        let (first, second) = tokio::join!(poll.reconcile(&issue), delivery.reconcile(&issue));

        assert!(matches!(first.unwrap(), ReconcileAction::Created(_)));
        assert!(matches!(second.unwrap(), ReconcileAction::Created(_)));
        assert_eq!(tasks.create_calls(), 2);
    }

    #[test]
    fn test_action_labels() {
        let action = ReconcileAction::NoOp {
            task_id: "1001".to_string(),
        };
        assert_eq!(action.kind(), "noop");
        assert_eq!(action.task_id(), "1001");
    }
}
