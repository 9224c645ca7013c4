//! GitHub Issues adapter
//!
//! REST v3 access to the issue source: assigned issues, their comments and
//! repository hooks. Collection endpoints are followed through the `Link`
//! header until no `rel="next"` page remains.

use super::retry::{with_retry, RetryConfig};
use super::IssueTracker;
use crate::config::GitHubSettings;
use crate::model::{Comment, Hook, Issue, IssueState, IssueStateFilter, RepoRef, User};
use crate::{HashiError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-request timeout for paginated listings
const GET_TIMEOUT: Duration = Duration::from_secs(15);
/// Per-request timeout for hook create/delete
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Largest page GitHub serves
const PER_PAGE: u32 = 100;

const SERVICE: &str = "GitHub";

/// GitHub REST client implementing [`IssueTracker`]
pub struct GitHubAdapter {
    client: Client,
    rest_base_url: String,
    auth_token: Option<String>,
    retry: RetryConfig,
}

/// Issue as returned by the REST API and carried in webhook payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub assignee: Option<GitHubUser>,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
    #[serde(default)]
    pub user: Option<GitHubUser>,
    pub html_url: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub comments: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Present when the "issue" is really a pull request
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubHook {
    pub id: u64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub config: GitHubHookConfig,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubHookConfig {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct CreateHookRequest<'a> {
    name: &'a str,
    active: bool,
    events: &'a [&'a str],
    config: CreateHookConfig<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct CreateHookConfig<'a> {
    url: &'a str,
    content_type: &'a str,
}

/// Error body: `{"message": "...", "errors": [{"message": "..."}]}`
#[derive(Debug, Default, Deserialize)]
struct GitHubErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GitHubErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GitHubErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl GitHubErrorBody {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self {
            message: body.chars().take(200).collect(),
            errors: Vec::new(),
        })
    }

    /// Top-level message joined with every detail message
    fn full_message(&self) -> String {
        let details: Vec<&str> = self
            .errors
            .iter()
            .filter_map(|e| e.message.as_deref().or(e.code.as_deref()))
            .collect();
        if details.is_empty() {
            self.message.clone()
        } else {
            format!("{}: {}", self.message, details.join("; "))
        }
    }

    fn is_hook_exists(&self) -> bool {
        self.full_message()
            .to_lowercase()
            .contains("hook already exists")
    }
}

impl GitHubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    /// Convert to the domain issue; `repo` wins over `repository_url`
    pub fn into_issue(self, repo: RepoRef) -> Issue {
        let assignee = self
            .assignee
            .or_else(|| self.assignees.into_iter().next())
            .map(GitHubUser::into_user);
        let state = if self.state.eq_ignore_ascii_case("closed") {
            IssueState::Closed
        } else {
            IssueState::Open
        };

        Issue {
            id: self.id,
            number: self.number,
            title: self.title,
            body: self.body,
            state,
            assignee,
            user: self.user.map(GitHubUser::into_user),
            repo,
            url: self.html_url,
            comments: self.comments,
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
            p_id: None,
            w_id: None,
        }
    }

    /// Repository derived from `repository_url`, if present
    pub fn repo_ref(&self) -> Option<RepoRef> {
        self.repository_url
            .as_deref()
            .and_then(RepoRef::from_api_url)
    }
}

impl GitHubUser {
    fn into_user(self) -> User {
        User::new(self.login, self.id)
    }
}

impl GitHubComment {
    fn into_comment(self, issue: &Issue) -> Comment {
        Comment {
            id: self.id,
            issue_id: issue.id,
            issue_number: issue.number,
            repo: issue.repo.clone(),
            user: self.user.map(GitHubUser::into_user),
            body: self.body.unwrap_or_default(),
            url: self.html_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl GitHubHook {
    fn into_hook(self, repo: &RepoRef) -> Hook {
        Hook {
            id: self.id,
            repo: repo.clone(),
            url: self.config.url.unwrap_or_default(),
            events: self.events,
            active: self.active,
            created_at: self.created_at,
        }
    }
}

/// REST root for a configured GitHub url
///
/// `https://github.com` maps to the public API; any other host is treated as
/// an API root already (`https://api.github.com`, `https://ghe/api/v3`).
fn rest_base_url(url: &str) -> String {
    let base = url.trim_end_matches('/');
    if base.contains("github.com") && !base.contains("api.github.com") {
        "https://api.github.com".to_string()
    } else {
        base.to_string()
    }
}

/// Extract the `rel="next"` target from a `Link` header
fn next_link(headers: &header::HeaderMap) -> Option<String> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if is_next {
            Some(
                target
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            )
        } else {
            None
        }
    })
}

/// Seconds until the rate-limit window resets, from GitHub's headers
fn rate_limit_wait(headers: &header::HeaderMap) -> Option<u64> {
    if let Some(secs) = headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
    {
        return Some(secs);
    }

    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())?;
    if remaining != "0" {
        return None;
    }
    let reset: i64 = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())?;
    Some((reset - Utc::now().timestamp()).max(1) as u64)
}

/// Turn a non-success response into a typed error
async fn error_for(response: Response) -> HashiError {
    let status = response.status();
    let wait = rate_limit_wait(response.headers());
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && wait.is_some())
    {
        return HashiError::RateLimited(wait.unwrap_or(60));
    }

    let parsed = GitHubErrorBody::parse(&body);
    if status == StatusCode::UNAUTHORIZED {
        return HashiError::Auth(format!("GitHub authentication failed: {}", parsed.message));
    }

    HashiError::Remote {
        service: SERVICE.to_string(),
        status: status.as_u16(),
        message: parsed.full_message(),
    }
}

impl GitHubAdapter {
    /// Create an adapter for the configured GitHub instance
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &GitHubSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static("hashi/1.0"),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/vnd.github.v3+json"),
                );
                headers
            })
            .build()?;

        Ok(Self {
            client,
            rest_base_url: rest_base_url(&config.url),
            auth_token: None,
            retry: RetryConfig::for_reads(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    fn repo_url(&self, repo: &RepoRef, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.rest_base_url,
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name),
            path
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch one page, returning its items and the next page url
    async fn get_page<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<(Vec<T>, Option<String>)> {
        let response = self
            .authorized(self.client.get(url).query(query))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let next = next_link(response.headers());
        let items: Vec<T> = response.json().await?;
        Ok((items, next))
    }

    /// Follow `Link` headers until the collection is exhausted
    async fn get_all<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: String,
        query: Vec<(&str, String)>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();

        let (first, mut next) =
            with_retry(&self.retry, operation, || self.get_page::<T>(&url, &query)).await?;
        items.extend(first);

        // next-page urls already carry the query string
        while let Some(page_url) = next.take() {
            let (page, following) =
                with_retry(&self.retry, operation, || self.get_page::<T>(&page_url, &[])).await?;
            debug!(operation = operation, count = page.len(), "Fetched GitHub page");
            items.extend(page);
            next = following;
        }

        Ok(items)
    }
}

#[async_trait]
impl IssueTracker for GitHubAdapter {
    async fn list_issues(
        &self,
        repo: &RepoRef,
        assignee: &str,
        state: IssueStateFilter,
    ) -> Result<Vec<Issue>> {
        debug!(repo = %repo, assignee = %assignee, state = state.as_str(), "Listing GitHub issues");

        let query = vec![
            ("assignee", assignee.to_string()),
            ("state", state.as_str().to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];
        let raw: Vec<GitHubIssue> = self
            .get_all("github.list_issues", self.repo_url(repo, "issues"), query)
            .await?;

        let issues: Vec<Issue> = raw
            .into_iter()
            .filter(|i| !i.is_pull_request())
            .map(|i| i.into_issue(repo.clone()))
            .collect();

        info!(repo = %repo, assignee = %assignee, count = issues.len(), "Fetched GitHub issues");
        Ok(issues)
    }

    async fn list_comments(&self, issue: &Issue) -> Result<Vec<Comment>> {
        debug!(repo = %issue.repo, number = issue.number, "Listing GitHub comments");

        let url = self.repo_url(&issue.repo, &format!("issues/{}/comments", issue.number));
        let raw: Vec<GitHubComment> = self
            .get_all(
                "github.list_comments",
                url,
                vec![("per_page", PER_PAGE.to_string())],
            )
            .await?;

        Ok(raw.into_iter().map(|c| c.into_comment(issue)).collect())
    }

    async fn create_webhook(&self, repo: &RepoRef, events: &[&str], url: &str) -> Result<Hook> {
        info!(repo = %repo, url = %url, "Creating GitHub hook");

        let request = CreateHookRequest {
            name: "web",
            active: true,
            events,
            config: CreateHookConfig {
                url,
                content_type: "json",
            },
        };

        let response = self
            .authorized(self.client.post(self.repo_url(repo, "hooks")).json(&request))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let hook: GitHubHook = response.json().await?;
                info!(repo = %repo, hook_id = hook.id, "GitHub hook created");
                Ok(hook.into_hook(repo))
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await.unwrap_or_default();
                let parsed = GitHubErrorBody::parse(&body);
                if parsed.is_hook_exists() {
                    debug!(repo = %repo, "GitHub reports hook already exists");
                    Err(HashiError::HookExists {
                        repo: repo.to_string(),
                    })
                } else {
                    Err(HashiError::Remote {
                        service: SERVICE.to_string(),
                        status: 422,
                        message: parsed.full_message(),
                    })
                }
            }
            _ => Err(error_for(response).await),
        }
    }

    async fn delete_webhook(&self, repo: &RepoRef, hook_id: u64) -> Result<()> {
        info!(repo = %repo, hook_id = hook_id, "Deleting GitHub hook");

        let response = self
            .authorized(
                self.client
                    .delete(self.repo_url(repo, &format!("hooks/{}", hook_id))),
            )
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let err = error_for(response).await;
            warn!(repo = %repo, hook_id = hook_id, error = %err, "Failed to delete GitHub hook");
            Err(err)
        }
    }

    async fn list_webhooks(&self, repo: &RepoRef) -> Result<Vec<Hook>> {
        debug!(repo = %repo, "Listing GitHub hooks");

        let raw: Vec<GitHubHook> = self
            .get_all(
                "github.list_webhooks",
                self.repo_url(repo, "hooks"),
                vec![("per_page", PER_PAGE.to_string())],
            )
            .await?;

        Ok(raw.into_iter().map(|h| h.into_hook(repo)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_and_enterprise_urls() {
        assert_eq!(rest_base_url("https://github.com"), "https://api.github.com");
        assert_eq!(
            rest_base_url("https://api.github.com/"),
            "https://api.github.com"
        );
        assert_eq!(
            rest_base_url("https://ghe.example.com/api/v3"),
            "https://ghe.example.com/api/v3"
        );
    }

    #[test]
    fn test_adapter_creation() {
        let adapter = GitHubAdapter::new(&GitHubSettings::default())
            .expect("Failed to create adapter")
            .with_token("t");
        assert!(adapter.is_authenticated());
        assert_eq!(
            adapter.repo_url(&RepoRef::new("acme", "widgets"), "hooks"),
            "https://api.github.com/repos/acme/widgets/hooks"
        );
    }

    #[test]
    fn test_next_link() {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::LINK,
            header::HeaderValue::from_static(
                "<https://api.github.com/repositories/1/issues?page=2>; rel=\"next\", \
                 <https://api.github.com/repositories/1/issues?page=5>; rel=\"last\"",
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );

        headers.insert(
            header::LINK,
            header::HeaderValue::from_static(
                "<https://api.github.com/repositories/1/issues?page=1>; rel=\"first\"",
            ),
        );
        assert_eq!(next_link(&headers), None);
        assert_eq!(next_link(&header::HeaderMap::new()), None);
    }

    #[test]
    fn test_issue_conversion() {
        let json = r#"{
            "id": 9001,
            "number": 42,
            "title": "Fix crash",
            "body": "NPE on load",
            "state": "closed",
            "assignee": null,
            "assignees": [{"login": "alice", "id": 7}],
            "user": {"login": "bob", "id": 8},
            "html_url": "https://github.com/acme/widgets/issues/42",
            "repository_url": "https://api.github.com/repos/acme/widgets",
            "comments": 3,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z",
            "closed_at": "2026-01-03T00:00:00Z"
        }"#;
        let raw: GitHubIssue = serde_json::from_str(json).unwrap();
        assert!(!raw.is_pull_request());

        let repo = raw.repo_ref().unwrap();
        let issue = raw.into_issue(repo);
        assert_eq!(issue.repo, RepoRef::new("acme", "widgets"));
        assert_eq!(issue.assignee_login(), Some("alice"));
        assert!(issue.is_closed());
        assert_eq!(issue.comments, 3);
        assert!(issue.closed_at.is_some());
    }

    #[test]
    fn test_pull_requests_are_recognised() {
        let json = r#"{
            "id": 1, "number": 2, "title": "PR", "state": "open",
            "html_url": "https://github.com/acme/widgets/pull/2",
            "pull_request": {"url": "https://api.github.com/repos/acme/widgets/pulls/2"}
        }"#;
        let raw: GitHubIssue = serde_json::from_str(json).unwrap();
        assert!(raw.is_pull_request());
    }

    #[test]
    fn test_hook_exists_detection() {
        let body = r#"{
            "message": "Validation Failed",
            "errors": [{"resource": "Hook", "code": "custom", "message": "Hook already exists on this repository"}]
        }"#;
        let parsed = GitHubErrorBody::parse(body);
        assert!(parsed.is_hook_exists());
        assert_eq!(
            parsed.full_message(),
            "Validation Failed: Hook already exists on this repository"
        );

        let other = GitHubErrorBody::parse(r#"{"message": "Validation Failed", "errors": [{"code": "missing_field"}]}"#);
        assert!(!other.is_hook_exists());
        assert_eq!(other.full_message(), "Validation Failed: missing_field");
    }

    #[test]
    fn test_unparseable_error_body_is_kept() {
        let parsed = GitHubErrorBody::parse("<html>bad gateway</html>");
        assert_eq!(parsed.full_message(), "<html>bad gateway</html>");
    }

    #[test]
    fn test_hook_conversion() {
        let json = r#"{
            "id": 77, "active": true, "events": ["issues"],
            "config": {"url": "http://sync.example.com/webhook", "content_type": "json"},
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let raw: GitHubHook = serde_json::from_str(json).unwrap();
        let hook = raw.into_hook(&RepoRef::new("acme", "widgets"));
        assert_eq!(hook.id, 77);
        assert_eq!(hook.url, "http://sync.example.com/webhook");
        assert_eq!(hook.events, vec!["issues".to_string()]);
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::RETRY_AFTER, header::HeaderValue::from_static("12"));
        assert_eq!(rate_limit_wait(&headers), Some(12));

        let mut headers = header::HeaderMap::new();
        headers.insert("x-ratelimit-remaining", header::HeaderValue::from_static("10"));
        assert_eq!(rate_limit_wait(&headers), None);
    }
}
