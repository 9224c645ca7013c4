//! Asana REST API client for Rust
//!
//! A type-safe async interface to the parts of the Asana API that a
//! task-sync service needs: workspaces, projects, tasks and stories.
//!
//! # Example
//!
//! ```no_run
//! use asana::{Client, NewTask};
//!
//! # async fn demo() -> asana::Result<()> {
//! let client = Client::new(std::env::var("ASANA_TOKEN").unwrap_or_default())?;
//!
//! for workspace in client.workspaces().await? {
//!     println!("{} ({})", workspace.name, workspace.gid);
//! }
//!
//! let task = client
//!     .create_task(&NewTask::new("Fix the bug", "12345").in_project("67890"))
//!     .await?;
//! println!("created {}", task.gid);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Public Asana API endpoint
pub const DEFAULT_BASE_URL: &str = "https://app.asana.com/api/1.0";

/// Page size requested for collection endpoints (Asana maximum)
const PAGE_LIMIT: u32 = 100;

/// Fields requested for workspaces
const WORKSPACE_FIELDS: &str = "name,is_organization";

/// Fields requested for projects
const PROJECT_FIELDS: &str =
    "name,archived,notes,created_at,modified_at,workspace,workspace.name,team,team.name";

/// Fields requested for tasks, both on reads and on write responses
const TASK_FIELDS: &str = "name,notes,completed,completed_at,assignee,assignee.name,\
assignee_status,created_at,modified_at,due_on,projects,projects.name,parent,parent.name,\
workspace,workspace.name";

/// Fields requested for stories
const STORY_FIELDS: &str = "created_at,text,type,resource_subtype,source,target,target.name";

/// Errors that can occur when talking to Asana
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request reached Asana and was refused with an error envelope
    #[error("Asana API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures that never reached the API (connect, timeout, TLS)
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_connect() || e.is_timeout() || e.is_request())
    }
}

/// Result type for Asana operations
pub type Result<T> = std::result::Result<T, Error>;

/// Compact reference to another Asana object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub gid: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Reference {
    pub fn new(gid: impl Into<String>) -> Self {
        Self {
            gid: gid.into(),
            name: None,
        }
    }
}

/// An Asana workspace or organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub gid: String,
    pub name: String,
    #[serde(default)]
    pub is_organization: bool,
}

/// An Asana project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub gid: String,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub workspace: Option<Reference>,
    #[serde(default)]
    pub team: Option<Reference>,
}

/// An Asana task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub gid: String,
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee: Option<Reference>,
    #[serde(default)]
    pub assignee_status: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_on: Option<NaiveDate>,
    #[serde(default)]
    pub projects: Vec<Reference>,
    #[serde(default)]
    pub parent: Option<Reference>,
    #[serde(default)]
    pub workspace: Option<Reference>,
}

/// A story (comment or system event) attached to a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub gid: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "type", default)]
    pub story_type: Option<String>,
    #[serde(default)]
    pub resource_subtype: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<Reference>,
}

/// Body of a task creation request
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub completed: bool,
    /// Assignee gid, email, or `"me"` for the token owner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_status: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
    pub workspace: String,
}

impl NewTask {
    pub fn new(name: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            notes: None,
            completed: false,
            assignee: None,
            assignee_status: None,
            projects: Vec::new(),
            workspace: workspace.into(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn in_project(mut self, project: impl Into<String>) -> Self {
        self.projects.push(project.into());
        self
    }

    pub fn assigned_to(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_assignee_status(mut self, status: impl Into<String>) -> Self {
        self.assignee_status = Some(status.into());
        self
    }
}

/// Body of a partial task update; only present fields are written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl UpdateTask {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.notes.is_none() && self.completed.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
    #[serde(default)]
    next_page: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: String,
}

#[derive(Debug, Serialize)]
struct WriteEnvelope<'a, T> {
    data: &'a T,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    help: Option<String>,
}

impl ErrorEnvelope {
    fn message(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| match &e.help {
                    Some(help) => format!("{} ({})", e.message, help),
                    None => e.message.clone(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Asana API client
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl Client {
    /// Create a client for the public Asana API using a personal access token
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Create a client against a custom API root
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static("hashi/1.0"),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// List every workspace visible to the token
    pub async fn workspaces(&self) -> Result<Vec<Workspace>> {
        self.get_all("workspaces", WORKSPACE_FIELDS).await
    }

    /// List every project in a workspace
    pub async fn projects(&self, workspace_gid: &str) -> Result<Vec<Project>> {
        self.get_all(&format!("workspaces/{}/projects", workspace_gid), PROJECT_FIELDS)
            .await
    }

    /// List every task in a project
    pub async fn project_tasks(&self, project_gid: &str) -> Result<Vec<Task>> {
        self.get_all(&format!("projects/{}/tasks", project_gid), TASK_FIELDS)
            .await
    }

    /// List every story on a task
    pub async fn task_stories(&self, task_gid: &str) -> Result<Vec<Story>> {
        self.get_all(&format!("tasks/{}/stories", task_gid), STORY_FIELDS)
            .await
    }

    /// Create a task
    pub async fn create_task(&self, task: &NewTask) -> Result<Task> {
        debug!(name = %task.name, workspace = %task.workspace, "Creating Asana task");
        self.write(Method::POST, "tasks", task).await
    }

    /// Apply a partial update to a task
    pub async fn update_task(&self, task_gid: &str, update: &UpdateTask) -> Result<Task> {
        debug!(task = %task_gid, "Updating Asana task");
        self.write(Method::PUT, &format!("tasks/{}", task_gid), update)
            .await
    }

    /// Fetch every page of a collection endpoint
    async fn get_all<T: DeserializeOwned>(&self, path: &str, fields: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = vec![
                ("opt_fields", fields.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(ref token) = offset {
                query.push(("offset", token.clone()));
            }

            let response = self
                .http
                .get(self.url(path))
                .bearer_auth(&self.token)
                .query(&query)
                .send()
                .await?;

            let page: DataEnvelope<Vec<T>> = Self::decode(response).await?;
            debug!(path = %path, count = page.data.len(), "Fetched Asana page");
            items.extend(page.data);

            match page.next_page {
                Some(next) => offset = Some(next.offset),
                None => break,
            }
        }

        Ok(items)
    }

    async fn write<B: Serialize>(&self, method: Method, path: &str, body: &B) -> Result<Task> {
        let response = self
            .http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .query(&[("opt_fields", TASK_FIELDS)])
            .json(&WriteEnvelope { data: body })
            .send()
            .await?;

        let envelope: DataEnvelope<Task> = Self::decode(response).await?;
        Ok(envelope.data)
    }

    /// Split a response into its data envelope or a typed error
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(Error::RateLimited(retry_after));
        }

        let body = response.text().await?;
        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                Error::UnexpectedResponse(format!("{}: {}", e, truncate(&body, 200)))
            });
        }

        let message = parse_error_message(&body);
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Auth(message));
        }
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Extract the human message from an Asana error body
fn parse_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.message())
        .unwrap_or_else(|| truncate(body, 200).to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
