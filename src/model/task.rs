//! Task-tracker records: workspaces, projects, tasks and stories

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact reference to another task-tracker object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

/// Root scope in the task tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_organization: bool,
}

impl Workspace {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_organization: false,
        }
    }

    pub fn reference(&self) -> Reference {
        Reference::named(&self.id, &self.name)
    }
}

/// A project; belongs to exactly one workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub workspace: Option<Reference>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, workspace: &Workspace) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            workspace: Some(workspace.reference()),
            archived: false,
            notes: None,
            created_at: None,
            modified_at: None,
        }
    }

    pub fn reference(&self) -> Reference {
        Reference::named(&self.id, &self.name)
    }
}

/// A task: the sync target
///
/// `notes` carries the correlation tag that links it to an issue; there is
/// no other linkage field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee: Option<Reference>,
    #[serde(default)]
    pub assignee_status: Option<String>,
    #[serde(default)]
    pub projects: Vec<Reference>,
    #[serde(default)]
    pub workspace: Option<Reference>,
    #[serde(default)]
    pub parent: Option<Reference>,
    #[serde(default)]
    pub due_on: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            notes: String::new(),
            completed: false,
            completed_at: None,
            assignee: None,
            assignee_status: None,
            projects: Vec::new(),
            workspace: None,
            parent: None,
            due_on: None,
            created_at: None,
            modified_at: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    pub fn in_project(mut self, project: Reference) -> Self {
        self.projects.push(project);
        self
    }

    pub fn in_workspace(mut self, workspace: Reference) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Fill membership fields a remote response left out
    pub fn backfill_membership(&mut self, projects: &[Reference], workspace: Option<&Reference>) {
        if self.projects.is_empty() {
            self.projects = projects.to_vec();
        }
        if self.workspace.is_none() {
            self.workspace = workspace.cloned();
        }
    }
}

/// A story (comment or activity entry) on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub task_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub story_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A task about to be created in the task tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub notes: String,
    pub completed: bool,
    pub assignee_status: String,
    pub projects: Vec<Reference>,
    pub workspace: Reference,
}

/// A field of a task that reconciliation can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskField {
    Name,
    Notes,
    Completed,
    CompletedAt,
}

impl fmt::Display for TaskField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskField::Name => write!(f, "name"),
            TaskField::Notes => write!(f, "notes"),
            TaskField::Completed => write!(f, "completed"),
            TaskField::CompletedAt => write!(f, "completed_at"),
        }
    }
}

/// A staged partial update: only the fields that differ are present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDiff {
    pub name: Option<String>,
    pub notes: Option<String>,
    pub completed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskDiff {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Fields present in this diff, in a stable order
    pub fn changed_fields(&self) -> Vec<TaskField> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push(TaskField::Name);
        }
        if self.notes.is_some() {
            fields.push(TaskField::Notes);
        }
        if self.completed.is_some() {
            fields.push(TaskField::Completed);
        }
        if self.completed_at.is_some() {
            fields.push(TaskField::CompletedAt);
        }
        fields
    }

    /// Apply every staged field to `task`
    pub fn apply(&self, task: &mut Task) {
        if let Some(ref name) = self.name {
            task.name = name.clone();
        }
        if let Some(ref notes) = self.notes {
            task.notes = notes.clone();
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = Some(completed_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_fields_and_apply() {
        let mut task = Task::new("1001", "Old").with_notes("n");
        let diff = TaskDiff {
            name: Some("New".to_string()),
            completed: Some(true),
            ..Default::default()
        };

        assert_eq!(
            diff.changed_fields(),
            vec![TaskField::Name, TaskField::Completed]
        );
        diff.apply(&mut task);
        assert_eq!(task.name, "New");
        assert!(task.completed);
        assert_eq!(task.notes, "n");
        assert!(TaskDiff::default().is_empty());
    }

    #[test]
    fn test_backfill_keeps_existing_membership() {
        let mut task = Task::new("1", "t").in_project(Reference::new("10"));
        task.backfill_membership(&[Reference::new("99")], Some(&Reference::new("1")));
        assert_eq!(task.projects, vec![Reference::new("10")]);
        assert_eq!(task.workspace, Some(Reference::new("1")));
    }
}
