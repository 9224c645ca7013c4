//! Issue-tracker records: issues, comments, hooks and repository references

use crate::{HashiError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Correlation tag embedded in a task's notes, e.g. `(GH 42)`
pub fn correlation_tag(number: u64) -> String {
    format!("(GH {})", number)
}

/// An `owner/name` repository reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse the repository out of an API url like
    /// `https://api.github.com/repos/acme/widgets`
    pub fn from_api_url(url: &str) -> Option<Self> {
        let rest = &url[url.find("/repos/")? + "/repos/".len()..];
        let mut parts = rest.split('/');
        let owner = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        Some(Self::new(owner, name))
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = HashiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(HashiError::Parse(format!(
                "Invalid repository '{}', expected owner/name",
                s
            ))),
        }
    }
}

/// An issue-tracker account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub id: u64,
}

impl User {
    pub fn new(login: impl Into<String>, id: u64) -> Self {
        Self {
            login: login.into(),
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueState::Open => write!(f, "open"),
            IssueState::Closed => write!(f, "closed"),
        }
    }
}

/// Which issues a listing should return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueStateFilter {
    Open,
    Closed,
    All,
}

impl IssueStateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStateFilter::Open => "open",
            IssueStateFilter::Closed => "closed",
            IssueStateFilter::All => "all",
        }
    }
}

/// An issue: the sync source
///
/// `p_id`/`w_id` are the target project and workspace, resolved from the
/// repository binding before the issue is reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: IssueState,
    #[serde(default)]
    pub assignee: Option<User>,
    #[serde(default)]
    pub user: Option<User>,
    pub repo: RepoRef,
    /// Browser url of the issue
    pub url: String,
    #[serde(default)]
    pub comments: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub p_id: Option<String>,
    #[serde(default)]
    pub w_id: Option<String>,
}

impl Issue {
    pub fn new(id: u64, number: u64, title: impl Into<String>, repo: RepoRef) -> Self {
        let url = format!("https://github.com/{}/issues/{}", repo, number);
        Self {
            id,
            number,
            title: title.into(),
            body: None,
            state: IssueState::Open,
            assignee: None,
            user: None,
            repo,
            url,
            comments: 0,
            created_at: None,
            updated_at: None,
            closed_at: None,
            p_id: None,
            w_id: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_assignee(mut self, assignee: User) -> Self {
        self.assignee = Some(assignee);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Mark the issue closed at `closed_at`
    pub fn closed(mut self, closed_at: DateTime<Utc>) -> Self {
        self.state = IssueState::Closed;
        self.closed_at = Some(closed_at);
        self
    }

    /// Stamp the target project/workspace
    pub fn with_target(mut self, project_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        self.p_id = Some(project_id.into());
        self.w_id = Some(workspace_id.into());
        self
    }

    pub fn is_closed(&self) -> bool {
        self.state == IssueState::Closed
    }

    pub fn assignee_login(&self) -> Option<&str> {
        self.assignee.as_ref().map(|a| a.login.as_str())
    }

    /// `owner/name#number`, unique across repositories
    pub fn key(&self) -> String {
        format!("{}#{}", self.repo, self.number)
    }

    pub fn correlation_tag(&self) -> String {
        correlation_tag(self.number)
    }

    /// Notes a linked task should carry: tag, body and url, one per line
    pub fn task_notes(&self) -> String {
        format!(
            "{}\n{}\n{}",
            self.correlation_tag(),
            self.body.as_deref().unwrap_or(""),
            self.url
        )
    }
}

/// A comment on an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub issue_id: u64,
    pub issue_number: u64,
    pub repo: RepoRef,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A change-notification subscription on a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub id: u64,
    pub repo: RepoRef,
    /// Callback url the hook delivers to
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}
