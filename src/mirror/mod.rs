//! Local mirror of both trackers
//!
//! Every remote record is stored as a JSON document in a named collection,
//! keyed by its remote id. Writes are upserts, so repeated or concurrent
//! refreshes converge on the last value written. Task notes are additionally
//! indexed for full-text search, which is how issues are linked to tasks.

mod sqlite;

pub use sqlite::{Mirror, MirrorConfig};

use crate::model::{Comment, Hook, Issue, Project, Story, Task, Workspace};
use rusqlite::types::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record that can live in the mirror
pub trait Document: Serialize + DeserializeOwned {
    /// Collection the record belongs to
    const COLLECTION: &'static str;

    /// Remote id; the upsert key
    fn document_id(&self) -> String;

    /// Text to index for full-text search, if the collection is searchable
    fn search_text(&self) -> Option<&str> {
        None
    }
}

impl Document for Workspace {
    const COLLECTION: &'static str = "workspaces";

    fn document_id(&self) -> String {
        self.id.clone()
    }
}

impl Document for Project {
    const COLLECTION: &'static str = "projects";

    fn document_id(&self) -> String {
        self.id.clone()
    }
}

impl Document for Task {
    const COLLECTION: &'static str = "tasks";

    fn document_id(&self) -> String {
        self.id.clone()
    }

    fn search_text(&self) -> Option<&str> {
        Some(&self.notes)
    }
}

impl Document for Story {
    const COLLECTION: &'static str = "stories";

    fn document_id(&self) -> String {
        self.id.clone()
    }
}

impl Document for Issue {
    const COLLECTION: &'static str = "issues";

    fn document_id(&self) -> String {
        self.id.to_string()
    }
}

impl Document for Comment {
    const COLLECTION: &'static str = "comments";

    fn document_id(&self) -> String {
        self.id.to_string()
    }
}

impl Document for Hook {
    const COLLECTION: &'static str = "hooks";

    fn document_id(&self) -> String {
        self.id.to_string()
    }
}

/// Equality conditions on JSON paths inside a document, ANDed together
///
/// ```
/// use hashi::mirror::Filter;
///
/// let filter = Filter::new()
///     .eq("$.repo.owner", "acme")
///     .eq("$.repo.name", "widgets")
///     .eq("$.assignee.login", "alice");
/// assert_eq!(filter.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the value at `path` (e.g. `$.repo.owner`) to equal `value`
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.clauses.push((path.into(), value.into().0));
        self
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub(crate) fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }
}

/// A value a JSON path is compared against; booleans compare as 0/1
#[derive(Debug, Clone)]
pub struct FilterValue(Value);

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self(Value::Text(s.to_string()))
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self(Value::Text(s))
    }
}

impl From<&String> for FilterValue {
    fn from(s: &String) -> Self {
        Self(Value::Text(s.clone()))
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        Self(Value::Integer(n))
    }
}

impl From<u64> for FilterValue {
    fn from(n: u64) -> Self {
        Self(Value::Integer(n as i64))
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self(Value::Integer(b as i64))
    }
}

/// Filter selecting a repository's mirrored records by `$.repo`
pub fn repo_filter(repo: &crate::model::RepoRef) -> Filter {
    Filter::new()
        .eq("$.repo.owner", &repo.owner)
        .eq("$.repo.name", &repo.name)
}
