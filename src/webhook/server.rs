//! HTTP listener for issue change notifications
//!
//! # Routes
//!
//! - `POST {path}` - issue delivery (path defaults to `/webhook`)
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus text format
//!
//! # Example
//!
//! ```no_run
//! use hashi::config::HashiConfig;
//! use hashi::webhook::WebhookServer;
//! # use hashi::sync::Orchestrator;
//! # use std::sync::Arc;
//! # async fn serve(orchestrator: Arc<Orchestrator>) -> hashi::Result<()> {
//! let config = HashiConfig::load_default()?;
//! WebhookServer::new(orchestrator, &config.webhook).run().await
//! # }
//! ```

use crate::config::WebhookSettings;
use crate::integrations::github::GitHubIssue;
use crate::model::{Issue, RepoRef};
use crate::sync::{metrics, Orchestrator};
use crate::{HashiError, Result};
use axum::{
    body::{to_bytes, Body},
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

/// Largest accepted delivery (5MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

/// Delivery body; only `issue` matters, everything else is optional
#[derive(Debug, Deserialize)]
struct IssueDelivery {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    issue: Option<GitHubIssue>,
    #[serde(default)]
    repository: Option<DeliveryRepository>,
}

#[derive(Debug, Deserialize)]
struct DeliveryRepository {
    full_name: String,
}

/// Extract the issue from a delivery body
///
/// `Ok(None)` for deliveries that carry no issue (pings, pull requests).
pub fn parse_delivery(body: &[u8]) -> Result<Option<Issue>> {
    let delivery: IssueDelivery = serde_json::from_slice(body)
        .map_err(|e| HashiError::Parse(format!("Invalid delivery body: {}", e)))?;

    let Some(issue) = delivery.issue else {
        return Ok(None);
    };
    if issue.is_pull_request() {
        return Ok(None);
    }

    let repo = match delivery.repository {
        Some(repository) => repository.full_name.parse::<RepoRef>()?,
        None => issue.repo_ref().ok_or_else(|| {
            HashiError::Parse(format!("Delivery for issue #{} names no repository", issue.number))
        })?,
    };

    tracing::debug!(
        repo = %repo,
        number = issue.number,
        action = delivery.action.as_deref().unwrap_or("-"),
        "Parsed issue delivery"
    );
    Ok(Some(issue.into_issue(repo)))
}

/// Shared server state
struct AppState {
    orchestrator: Arc<Orchestrator>,
    max_body_size: usize,
    /// Reconciliations started by deliveries that have not finished yet
    in_flight: Mutex<JoinSet<()>>,
}

impl AppState {
    fn spawn_reconcile(&self, issue: Issue) {
        let orchestrator = self.orchestrator.clone();
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            let key = issue.key();
            if let Err(e) = orchestrator.accept_issue(issue).await {
                tracing::warn!(issue = %key, error = %e, "Delivered issue was not reconciled");
            }
        });
    }

    fn take_in_flight(&self) -> JoinSet<()> {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *in_flight)
    }
}

/// Listener that feeds deliveries to the orchestrator
pub struct WebhookServer {
    state: Arc<AppState>,
    path: String,
    addr: String,
}

impl WebhookServer {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: &WebhookSettings) -> Self {
        Self {
            state: Arc::new(AppState {
                orchestrator,
                max_body_size: DEFAULT_MAX_BODY_SIZE,
                in_flight: Mutex::new(JoinSet::new()),
            }),
            path: settings.path.clone(),
            addr: settings.listen_addr(),
        }
    }

    /// Must be called before the server is shared
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.max_body_size = max_body_size;
        }
        self
    }

    /// Body size is checked by the delivery handler so oversized bodies still get 200
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(prometheus_metrics))
            .route(&self.path, post(receive_delivery))
            .layer(DefaultBodyLimit::disable())
            .with_state(self.state.clone())
    }

    /// Serve until the task is dropped
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` resolves, then wait for in-flight reconciliations
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.addr).await.map_err(|e| {
            HashiError::Network(format!("Failed to bind {}: {}", self.addr, e))
        })?;

        tracing::info!(addr = %self.addr, path = %self.path, "Webhook listener started");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(HashiError::Io)?;

        self.drain().await;
        tracing::info!("Webhook listener stopped");
        Ok(())
    }

    /// Wait for every reconciliation started by a delivery so far
    pub async fn drain(&self) {
        let mut in_flight = self.state.take_in_flight();
        if !in_flight.is_empty() {
            tracing::info!(pending = in_flight.len(), "Waiting for delivered issues");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Delivery reconciliation panicked");
            }
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}

/// Always 200: failures are logged, never reported to the sender
async fn receive_delivery(State(state): State<Arc<AppState>>, body: Body) -> StatusCode {
    let body = match to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            metrics::record_webhook("oversized");
            tracing::warn!(limit = state.max_body_size, error = %e, "Dropping unreadable delivery");
            return StatusCode::OK;
        }
    };

    match parse_delivery(&body) {
        Ok(Some(issue)) => {
            metrics::record_webhook("accepted");
            state.spawn_reconcile(issue);
        }
        Ok(None) => {
            metrics::record_webhook("ignored");
            tracing::debug!("Delivery carries no issue, ignoring");
        }
        Err(e) => {
            metrics::record_webhook("malformed");
            tracing::warn!(error = %e, "Dropping malformed delivery");
        }
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoBinding;
    use crate::integrations::{MemoryIssueTracker, MemoryTaskTracker};
    use crate::mirror::Mirror;
    use crate::model::{Project, Workspace};
    use crate::sync::{OrchestratorConfig, SyncEvent};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn delivery(number: u64, login: &str) -> serde_json::Value {
        serde_json::json!({
            "action": "opened",
            "issue": {
                "id": 9000 + number,
                "number": number,
                "title": "Fix crash",
                "body": "NPE on load",
                "state": "open",
                "assignee": { "login": login, "id": 7 },
                "html_url": format!("https://github.com/acme/widgets/issues/{}", number),
                "repository_url": "https://api.github.com/repos/acme/widgets"
            },
            "repository": { "full_name": "acme/widgets" }
        })
    }

    fn create_test_server() -> (WebhookServer, Arc<MemoryTaskTracker>, Arc<Orchestrator>) {
        let tasks = Arc::new(MemoryTaskTracker::new());
        let issues = Arc::new(MemoryIssueTracker::new());
        let mirror = Mirror::in_memory().unwrap();

        let workspace = Workspace::new("1", "W");
        mirror.upsert(&workspace).unwrap();
        mirror.upsert(&Project::new("10", "P", &workspace)).unwrap();

        let config = OrchestratorConfig::new(
            vec![RepoBinding::new("W", "P", "acme/widgets", "alice")],
            "http://sync.example.com/webhook",
        );
        let orchestrator = Arc::new(Orchestrator::new(config, tasks.clone(), issues, mirror));
        let server = WebhookServer::new(orchestrator.clone(), &WebhookSettings::default());
        (server, tasks, orchestrator)
    }

    fn post(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("Content-Type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[test]
    fn test_parse_delivery() {
        let body = serde_json::to_vec(&delivery(42, "alice")).unwrap();
        let issue = parse_delivery(&body).unwrap().unwrap();
        assert_eq!(issue.key(), "acme/widgets#42");
        assert_eq!(issue.assignee_login(), Some("alice"));
    }

    #[test]
    fn test_parse_delivery_without_issue() {
        let ping = br#"{"zen": "Keep it logically awesome.", "hook_id": 5}"#;
        assert!(parse_delivery(ping).unwrap().is_none());
    }

    #[test]
    fn test_parse_delivery_falls_back_to_repository_url() {
        let mut body = delivery(42, "alice");
        body.as_object_mut().unwrap().remove("repository");
        let issue = parse_delivery(&serde_json::to_vec(&body).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(issue.repo, RepoRef::new("acme", "widgets"));
    }

    #[test]
    fn test_parse_delivery_rejects_garbage() {
        assert!(matches!(
            parse_delivery(b"not json"),
            Err(HashiError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (server, _, _) = create_test_server();
        let response = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (server, _, _) = create_test_server();
        let response = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_delivery_still_ok() {
        let (server, tasks, _) = create_test_server();
        let response = server.router().oneshot(post("{ nope")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tasks.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_oversized_delivery_still_ok() {
        let (server, tasks, _) = create_test_server();
        let server = server.with_max_body_size(16);

        let body = serde_json::to_string(&delivery(42, "alice")).unwrap();
        assert!(body.len() > 64);
        let response = server.router().oneshot(post(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        server.drain().await;
        assert_eq!(tasks.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_delivered_issue() {
        let (server, tasks, _) = create_test_server();
        tasks.set_write_delay(Duration::from_secs(30));

        let body = serde_json::to_string(&delivery(42, "alice")).unwrap();
        let response = server.router().oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(tasks.tasks().is_empty());

        server.drain().await;
        assert_eq!(tasks.create_calls(), 1);
        assert_eq!(tasks.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_creates_task() {
        let (server, tasks, orchestrator) = create_test_server();
        let mut events = orchestrator.subscribe();

        let body = serde_json::to_string(&delivery(42, "alice")).unwrap();
        let response = server.router().oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let reconciled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SyncEvent::IssueReconciled { issue, action, .. }) = events.recv().await {
                    return (issue, action);
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(reconciled, ("acme/widgets#42".to_string(), "created"));
        let created = tasks.tasks();
        assert_eq!(created.len(), 1);
        assert!(created[0].notes.starts_with("(GH 42)"));
    }
}
