//! Asana task tracker adapter
//!
//! Wraps the `asana` client crate behind [`TaskTracker`], converting its wire
//! types (`gid`) into the domain model and classifying write failures.

use super::retry::{with_retry, RetryConfig};
use super::TaskTracker;
use crate::config::AsanaSettings;
use crate::model::{NewTask, Project, Reference, Story, Task, TaskDiff, Workspace};
use crate::{HashiError, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// Assignee value meaning "the token owner"
const ASSIGN_TO_SELF: &str = "me";

/// Asana adapter implementing [`TaskTracker`]
pub struct AsanaAdapter {
    client: asana::Client,
    retry: RetryConfig,
}

impl AsanaAdapter {
    pub fn new(config: &AsanaSettings, token: impl Into<String>) -> Result<Self> {
        let client = asana::Client::with_base_url(token, &config.url)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: asana::Client) -> Self {
        Self {
            client,
            retry: RetryConfig::for_reads(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Application-level refusals become `TaskRejected`; the rest pass through
fn classify_write_error(task: &str, err: asana::Error) -> HashiError {
    match err {
        asana::Error::Api { status, message } if (400..500).contains(&status) && status != 429 => {
            HashiError::TaskRejected {
                task: task.to_string(),
                message,
            }
        }
        asana::Error::UnexpectedResponse(message) => HashiError::TaskRejected {
            task: task.to_string(),
            message,
        },
        other => HashiError::Asana(other),
    }
}

fn reference(r: asana::Reference) -> Reference {
    Reference { id: r.gid, name: r.name }
}

fn workspace(w: asana::Workspace) -> Workspace {
    Workspace {
        id: w.gid,
        name: w.name,
        is_organization: w.is_organization,
    }
}

fn project(p: asana::Project, parent: &Workspace) -> Project {
    Project {
        id: p.gid,
        name: p.name,
        workspace: Some(p.workspace.map(reference).unwrap_or_else(|| parent.reference())),
        archived: p.archived,
        notes: p.notes,
        created_at: p.created_at,
        modified_at: p.modified_at,
    }
}

fn task(t: asana::Task) -> Task {
    Task {
        id: t.gid,
        name: t.name,
        notes: t.notes.unwrap_or_default(),
        completed: t.completed,
        completed_at: t.completed_at,
        assignee: t.assignee.map(reference),
        assignee_status: t.assignee_status,
        projects: t.projects.into_iter().map(reference).collect(),
        workspace: t.workspace.map(reference),
        parent: t.parent.map(reference),
        due_on: t.due_on,
        created_at: t.created_at,
        modified_at: t.modified_at,
    }
}

fn story(s: asana::Story, task_id: &str) -> Story {
    Story {
        id: s.gid,
        task_id: s
            .target
            .map(|t| t.gid)
            .unwrap_or_else(|| task_id.to_string()),
        text: s.text,
        story_type: s.resource_subtype.or(s.story_type),
        source: s.source,
        created_at: s.created_at,
    }
}

/// Request body for a new task, always assigned to the token owner
fn new_task_request(new: &NewTask) -> asana::NewTask {
    let mut request = asana::NewTask::new(&new.name, &new.workspace.id)
        .with_notes(&new.notes)
        .assigned_to(ASSIGN_TO_SELF)
        .with_assignee_status(&new.assignee_status);
    request.completed = new.completed;
    for p in &new.projects {
        request = request.in_project(&p.id);
    }
    request
}

/// `completed_at` is read-only remotely; only the writable fields go out
fn update_request(diff: &TaskDiff) -> asana::UpdateTask {
    asana::UpdateTask {
        name: diff.name.clone(),
        notes: diff.notes.clone(),
        completed: diff.completed,
    }
}

#[async_trait]
impl TaskTracker for AsanaAdapter {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        debug!("Listing Asana workspaces");
        let raw = with_retry(&self.retry, "asana.list_workspaces", || async {
            self.client.workspaces().await.map_err(HashiError::from)
        })
        .await?;
        Ok(raw.into_iter().map(workspace).collect())
    }

    async fn list_projects(&self, ws: &Workspace) -> Result<Vec<Project>> {
        debug!(workspace = %ws.name, "Listing Asana projects");
        let raw = with_retry(&self.retry, "asana.list_projects", || async {
            self.client.projects(&ws.id).await.map_err(HashiError::from)
        })
        .await?;
        Ok(raw.into_iter().map(|p| project(p, ws)).collect())
    }

    async fn list_tasks(&self, p: &Project) -> Result<Vec<Task>> {
        debug!(project = %p.name, "Listing Asana tasks");
        let raw = with_retry(&self.retry, "asana.list_tasks", || async {
            self.client.project_tasks(&p.id).await.map_err(HashiError::from)
        })
        .await?;

        let membership = [p.reference()];
        Ok(raw
            .into_iter()
            .map(|t| {
                let mut t = task(t);
                t.backfill_membership(&membership, p.workspace.as_ref());
                t
            })
            .collect())
    }

    async fn create_task(&self, new: &NewTask) -> Result<Task> {
        info!(name = %new.name, workspace = %new.workspace.id, "Creating Asana task");
        let created = self
            .client
            .create_task(&new_task_request(new))
            .await
            .map_err(|e| classify_write_error(&new.name, e))?;

        let mut created = task(created);
        created.backfill_membership(&new.projects, Some(&new.workspace));
        Ok(created)
    }

    async fn update_task(&self, current: &Task, diff: &TaskDiff) -> Result<Task> {
        let fields: Vec<String> = diff.changed_fields().iter().map(|f| f.to_string()).collect();
        info!(task = %current.id, fields = %fields.join(","), "Updating Asana task");

        let updated = self
            .client
            .update_task(&current.id, &update_request(diff))
            .await
            .map_err(|e| classify_write_error(&current.id, e))?;

        let mut updated = task(updated);
        updated.backfill_membership(&current.projects, current.workspace.as_ref());
        Ok(updated)
    }

    async fn list_stories(&self, t: &Task) -> Result<Vec<Story>> {
        debug!(task = %t.id, "Listing Asana stories");
        let raw = with_retry(&self.retry, "asana.list_stories", || async {
            self.client.task_stories(&t.id).await.map_err(HashiError::from)
        })
        .await?;
        Ok(raw.into_iter().map(|s| story(s, &t.id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_request_shape() {
        let new = NewTask {
            name: "Fix crash".to_string(),
            notes: "(GH 42)\nNPE on load\nurl".to_string(),
            completed: false,
            assignee_status: "inbox".to_string(),
            projects: vec![Reference::new("10")],
            workspace: Reference::new("1"),
        };

        let body = serde_json::to_value(new_task_request(&new)).unwrap();
        assert_eq!(body["name"], "Fix crash");
        assert_eq!(body["assignee"], "me");
        assert_eq!(body["assignee_status"], "inbox");
        assert_eq!(body["projects"], serde_json::json!(["10"]));
        assert_eq!(body["workspace"], "1");
        assert_eq!(body["completed"], false);
    }

    #[test]
    fn test_update_request_omits_completed_at() {
        let diff = TaskDiff {
            completed: Some(true),
            completed_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        let body = serde_json::to_value(update_request(&diff)).unwrap();
        assert_eq!(body, serde_json::json!({"completed": true}));
    }

    #[test]
    fn test_write_error_classification() {
        let rejected = classify_write_error(
            "Fix crash",
            asana::Error::Api {
                status: 400,
                message: "name: Missing input".to_string(),
            },
        );
        assert!(matches!(
            rejected,
            HashiError::TaskRejected { ref task, ref message }
                if task == "Fix crash" && message == "name: Missing input"
        ));

        let server = classify_write_error(
            "1001",
            asana::Error::Api {
                status: 503,
                message: "down".to_string(),
            },
        );
        assert!(matches!(server, HashiError::Asana(_)));

        let throttled = classify_write_error("1001", asana::Error::RateLimited(5));
        assert!(matches!(throttled, HashiError::Asana(asana::Error::RateLimited(5))));
    }

    #[test]
    fn test_task_conversion_keeps_notes_and_membership() {
        let raw: asana::Task = serde_json::from_value(serde_json::json!({
            "gid": "1001",
            "name": "Fix crash",
            "notes": null,
            "completed": true,
            "projects": [{"gid": "10", "name": "P"}],
            "workspace": {"gid": "1"}
        }))
        .unwrap();

        let t = task(raw);
        assert_eq!(t.id, "1001");
        assert_eq!(t.notes, "");
        assert!(t.completed);
        assert_eq!(t.projects, vec![Reference::named("10", "P")]);
        assert_eq!(t.workspace, Some(Reference::new("1")));
    }

    #[test]
    fn test_project_backfills_workspace() {
        let ws = Workspace::new("1", "W");
        let raw: asana::Project =
            serde_json::from_value(serde_json::json!({"gid": "10", "name": "P"})).unwrap();
        let p = project(raw, &ws);
        assert_eq!(p.workspace, Some(Reference::named("1", "W")));
    }

    #[test]
    fn test_story_prefers_subtype() {
        let raw: asana::Story = serde_json::from_value(serde_json::json!({
            "gid": "5",
            "type": "comment",
            "resource_subtype": "comment_added",
            "text": "looks good"
        }))
        .unwrap();
        let s = story(raw, "1001");
        assert_eq!(s.task_id, "1001");
        assert_eq!(s.story_type.as_deref(), Some("comment_added"));
    }
}
