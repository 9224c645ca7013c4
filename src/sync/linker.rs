//! Issue to task linkage
//!
//! Tasks carry no foreign key back to their issue. The link is the
//! correlation tag `(GH <number>)` written into the task's notes, recovered
//! through full-text search over the mirrored tasks. The tag carries only the
//! issue number, so the issue url on the last line of the notes tells apart
//! issues that share a number across repositories.

use crate::mirror::Mirror;
use crate::model::{Issue, Task};
use crate::Result;
use tracing::{debug, warn};

/// Search string for an issue's correlation tag
pub fn tag_query(number: u64) -> String {
    format!("(gh {})", number)
}

pub struct IdentityLinker {
    mirror: Mirror,
}

impl IdentityLinker {
    pub fn new(mirror: Mirror) -> Self {
        Self { mirror }
    }

    /// The task linked to `issue`, if any
    ///
    /// A task whose notes end with the issue's url is preferred. Tasks whose
    /// notes end with another issue's url belong to that issue and are never
    /// claimed. Otherwise the first search hit wins.
    pub fn find_linked_task(&self, issue: &Issue) -> Result<Option<Task>> {
        let hits: Vec<Task> = self.mirror.text_search(&tag_query(issue.number))?;
        let total = hits.len();

        let (own, rest): (Vec<Task>, Vec<Task>) = hits
            .into_iter()
            .partition(|t| linked_url(t) == Some(issue.url.as_str()));
        let unclaimed: Vec<Task> = rest
            .into_iter()
            .filter(|t| linked_url(t).is_none())
            .collect();
        let candidates = if own.is_empty() { unclaimed } else { own };

        if candidates.len() > 1 {
            warn!(
                issue = %issue.key(),
                matches = candidates.len(),
                chosen = %candidates[0].id,
                "Several tasks carry the same correlation tag"
            );
        }

        let linked = candidates.into_iter().next();
        debug!(
            issue = %issue.key(),
            hits = total,
            task = linked.as_ref().map(|t| t.id.as_str()).unwrap_or("-"),
            "Resolved issue link"
        );
        Ok(linked)
    }
}

/// Issue url a task's notes end with, if the last line is one
fn linked_url(task: &Task) -> Option<&str> {
    task.notes
        .lines()
        .last()
        .map(str::trim)
        .filter(|line| line.starts_with("http") && line.contains("/issues/"))
}
