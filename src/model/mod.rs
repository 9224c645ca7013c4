//! Domain model
//!
//! Tracker-neutral records shared by the adapters, the local mirror and the
//! reconciler. Task-tracker ids are opaque strings; issue-tracker ids are
//! numeric. Both are the remote identity of a record.

mod issue;
mod task;

pub use issue::{
    correlation_tag, Comment, Hook, Issue, IssueState, IssueStateFilter, RepoRef, User,
};
pub use task::{NewTask, Project, Reference, Story, Task, TaskDiff, TaskField, Workspace};
