//! Sync orchestrator
//!
//! Drives periodic full syncs and out-of-band single-issue reconciliation.
//!
//! A cycle has two population branches that run concurrently:
//!
//! - **tasks**: workspaces -> projects -> tasks, filtered to the configured
//!   bindings and mirrored, producing the name -> id [`Directory`]
//! - **issues**: every issue assigned to each binding's user, mirrored
//!
//! Fan-out starts only after both branches have finished. Each binding's
//! mirrored issues are stamped with their target project/workspace and
//! reconciled independently; then the binding's repository hook is ensured.
//! The next cycle starts `poll_interval` after the previous one ends.

use super::hooks::{HookOutcome, HookRegistrar};
use super::metrics;
use super::reconciler::{ReconcileAction, Reconciler};
use crate::config::{HashiConfig, RepoBinding};
use crate::integrations::{IssueTracker, TaskTracker};
use crate::mirror::{repo_filter, Mirror};
use crate::model::{Issue, IssueStateFilter, Project, RepoRef, Workspace};
use crate::{HashiError, Result};
use futures::future::{join_all, try_join_all};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

/// Default delay between cycles (10 minutes)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(600);

/// Default event channel capacity (1000 events)
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub bindings: Vec<RepoBinding>,

    /// Delay between the end of one cycle and the start of the next
    pub poll_interval: Duration,

    /// Url registered on repository hooks
    pub callback_url: String,

    pub event_channel_capacity: usize,
}

impl OrchestratorConfig {
    pub fn new(bindings: Vec<RepoBinding>, callback_url: impl Into<String>) -> Self {
        Self {
            bindings,
            poll_interval: DEFAULT_POLL_INTERVAL,
            callback_url: callback_url.into(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

impl From<&HashiConfig> for OrchestratorConfig {
    fn from(config: &HashiConfig) -> Self {
        Self::new(config.bindings.clone(), config.callback_url())
            .with_poll_interval(config.poll_interval())
    }
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started,
    Stopped,
    CycleStarted,

    /// Workspace/project/task population finished
    TasksPopulated {
        workspaces: usize,
        projects: usize,
        tasks: usize,
    },

    /// Issue population finished
    IssuesPopulated { issues: usize },

    /// Both branches done; per-issue reconciliation begins
    FanOutStarted,

    IssueReconciled {
        issue: String,
        action: &'static str,
        task_id: String,
    },

    HookEnsured { repo: String },

    CycleCompleted(CycleReport),

    Error { message: String },
}

/// Commands accepted by a running orchestrator
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// Start a cycle now instead of waiting out the interval
    SyncNow,

    Shutdown,
}

/// Resolved workspace and project ids for the configured names
#[derive(Debug, Clone, Default)]
pub struct Directory {
    workspaces: HashMap<String, String>,
    projects: HashMap<(String, String), String>,
}

impl Directory {
    pub fn insert_workspace(&mut self, workspace: &Workspace) {
        self.workspaces
            .insert(workspace.name.clone(), workspace.id.clone());
    }

    pub fn insert_project(&mut self, workspace_name: &str, project: &Project) {
        self.projects.insert(
            (workspace_name.to_string(), project.name.clone()),
            project.id.clone(),
        );
    }

    /// `(project_id, workspace_id)` for a binding, if both are monitored
    pub fn resolve(&self, binding: &RepoBinding) -> Option<(String, String)> {
        let workspace = self.workspaces.get(&binding.workspace)?;
        let project = self
            .projects
            .get(&(binding.workspace.clone(), binding.project.clone()))?;
        Some((project.clone(), workspace.clone()))
    }

    /// Rebuild from what the last population pass mirrored
    pub fn from_mirror(mirror: &Mirror, bindings: &[RepoBinding]) -> Result<Self> {
        let wanted: HashSet<&str> = bindings.iter().map(|b| b.workspace.as_str()).collect();
        let mut directory = Self::default();
        let mut names_by_id = HashMap::new();

        for workspace in mirror.all::<Workspace>()? {
            if wanted.contains(workspace.name.as_str()) {
                directory.insert_workspace(&workspace);
                names_by_id.insert(workspace.id.clone(), workspace.name.clone());
            }
        }

        for project in mirror.all::<Project>()? {
            let owner = project
                .workspace
                .as_ref()
                .and_then(|w| names_by_id.get(&w.id));
            if let Some(workspace_name) = owner {
                directory.insert_project(workspace_name, &project);
            }
        }

        Ok(directory)
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }
}

/// Outcome of one full cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub workspaces: usize,
    pub projects: usize,
    pub tasks: usize,
    pub issues: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Issues whose binding names an unmonitored workspace/project
    pub skipped: usize,
    pub failed: usize,
    pub hooks_ensured: usize,
    pub hook_failures: usize,
    /// The task population branch failed, so no fan-out ran
    pub aborted: bool,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn status(&self) -> &'static str {
        if self.aborted {
            "failed"
        } else if self.failed > 0 || self.hook_failures > 0 || !self.errors.is_empty() {
            "partial"
        } else {
            "success"
        }
    }

    fn record(&mut self, result: &Result<ReconcileAction>) {
        match result {
            Ok(ReconcileAction::Created(_)) => self.created += 1,
            Ok(ReconcileAction::Updated { .. }) => self.updated += 1,
            Ok(ReconcileAction::NoOp { .. }) => self.unchanged += 1,
            Err(e) => {
                self.failed += 1;
                self.errors.push(e.to_string());
            }
        }
    }

    fn merge(&mut self, other: CycleReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.hooks_ensured += other.hooks_ensured;
        self.hook_failures += other.hook_failures;
        self.errors.extend(other.errors);
    }
}

/// Result of the task population branch
struct TaskPopulation {
    directory: Directory,
    tasks: usize,
}

/// Sync orchestrator
///
/// Shared behind an `Arc` between the polling loop and the webhook listener.
pub struct Orchestrator {
    config: OrchestratorConfig,
    tasks: Arc<dyn TaskTracker>,
    issues: Arc<dyn IssueTracker>,
    mirror: Mirror,
    reconciler: Reconciler,
    hooks: HookRegistrar,
    event_tx: broadcast::Sender<SyncEvent>,
    command_tx: mpsc::Sender<SyncCommand>,
    command_rx: Mutex<Option<mpsc::Receiver<SyncCommand>>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        tasks: Arc<dyn TaskTracker>,
        issues: Arc<dyn IssueTracker>,
        mirror: Mirror,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(10);
        let reconciler = Reconciler::new(tasks.clone(), mirror.clone());
        let hooks = HookRegistrar::new(issues.clone(), mirror.clone(), &config.callback_url);

        Self {
            config,
            tasks,
            issues,
            mirror,
            reconciler,
            hooks,
            event_tx,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn hooks(&self) -> &HookRegistrar {
        &self.hooks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub fn command_sender(&self) -> mpsc::Sender<SyncCommand> {
        self.command_tx.clone()
    }

    fn send_event(&self, event: SyncEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Event sent but no receivers subscribed");
        }
    }

    fn report_error(&self, message: String) {
        tracing::error!("{}", message);
        self.send_event(SyncEvent::Error { message });
    }

    /// Run one full cycle: populate both sides, then reconcile and ensure hooks
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        self.send_event(SyncEvent::CycleStarted);
        tracing::info!(bindings = self.config.bindings.len(), "Sync cycle started");

        let mut report = CycleReport::default();

        // barrier: fan-out waits for both branches
        let (tasks_branch, issues_branch) =
            tokio::join!(self.populate_tasks(), self.populate_issues());

        let (issue_count, issue_errors) = issues_branch;
        report.issues = issue_count;
        report.errors.extend(issue_errors);

        match tasks_branch {
            Ok(population) => {
                report.workspaces = population.directory.workspace_count();
                report.projects = population.directory.project_count();
                report.tasks = population.tasks;

                self.send_event(SyncEvent::FanOutStarted);
                let per_binding = join_all(
                    self.config
                        .bindings
                        .iter()
                        .map(|b| self.sync_binding(b, &population.directory)),
                )
                .await;
                for binding_report in per_binding {
                    report.merge(binding_report);
                }
            }
            Err(e) => {
                metrics::record_api_error("population", "asana");
                report.aborted = true;
                report.errors.push(e.to_string());
                self.report_error(format!("Task population failed, skipping fan-out: {}", e));
            }
        }

        report.duration = start.elapsed();
        metrics::record_cycle_duration(report.duration.as_secs_f64());
        metrics::record_sync_cycle(report.status());
        tracing::info!(
            status = report.status(),
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            duration_ms = report.duration.as_millis() as u64,
            "Sync cycle completed"
        );
        self.send_event(SyncEvent::CycleCompleted(report.clone()));
        report
    }

    /// Workspaces -> projects -> tasks, each stage filtered to the bindings
    async fn populate_tasks(&self) -> Result<TaskPopulation> {
        let bound_workspaces: HashSet<&str> = self
            .config
            .bindings
            .iter()
            .map(|b| b.workspace.as_str())
            .collect();
        let bound_projects: HashSet<(&str, &str)> = self
            .config
            .bindings
            .iter()
            .map(|b| (b.workspace.as_str(), b.project.as_str()))
            .collect();

        let workspaces: Vec<Workspace> = self
            .tasks
            .list_workspaces()
            .await?
            .into_iter()
            .filter(|w| bound_workspaces.contains(w.name.as_str()))
            .collect();
        self.mirror.upsert_all(&workspaces)?;

        let project_lists =
            try_join_all(workspaces.iter().map(|w| self.tasks.list_projects(w))).await?;

        let mut directory = Directory::default();
        let mut projects = Vec::new();
        for (workspace, listed) in workspaces.iter().zip(project_lists) {
            directory.insert_workspace(workspace);
            for project in listed {
                if bound_projects.contains(&(workspace.name.as_str(), project.name.as_str())) {
                    directory.insert_project(&workspace.name, &project);
                    projects.push(project);
                }
            }
        }
        self.mirror.upsert_all(&projects)?;

        let task_lists = try_join_all(projects.iter().map(|p| self.tasks.list_tasks(p))).await?;
        let tasks: Vec<_> = task_lists.into_iter().flatten().collect();
        self.mirror.upsert_all(&tasks)?;

        self.send_event(SyncEvent::TasksPopulated {
            workspaces: workspaces.len(),
            projects: projects.len(),
            tasks: tasks.len(),
        });
        tracing::debug!(
            workspaces = workspaces.len(),
            projects = projects.len(),
            tasks = tasks.len(),
            "Task population finished"
        );

        Ok(TaskPopulation {
            directory,
            tasks: tasks.len(),
        })
    }

    /// Mirror every issue of every binding; a failing repository is logged
    /// and the rest continue
    async fn populate_issues(&self) -> (usize, Vec<String>) {
        let fetches = self.config.bindings.iter().map(|binding| async move {
            let repo = binding.repo_ref()?;
            let issues = self
                .issues
                .list_issues(&repo, &binding.github_user, IssueStateFilter::All)
                .await?;
            self.mirror.upsert_all(&issues)?;
            Ok::<_, HashiError>(issues.len())
        });

        let mut total = 0;
        let mut errors = Vec::new();
        for (binding, result) in self.config.bindings.iter().zip(join_all(fetches).await) {
            match result {
                Ok(count) => total += count,
                Err(e) => {
                    metrics::record_api_error("population", "github");
                    let message = format!("Issue population failed for {}: {}", binding.repo, e);
                    self.report_error(message.clone());
                    errors.push(message);
                }
            }
        }

        self.send_event(SyncEvent::IssuesPopulated { issues: total });
        (total, errors)
    }

    /// Reconcile every mirrored issue of one binding, then ensure its hook
    async fn sync_binding(&self, binding: &RepoBinding, directory: &Directory) -> CycleReport {
        let mut report = CycleReport::default();

        let repo = match binding.repo_ref() {
            Ok(repo) => repo,
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        match self.bound_issues(&repo, binding) {
            Ok(issues) => match directory.resolve(binding) {
                Some((project_id, workspace_id)) => {
                    let stamped: Vec<Issue> = issues
                        .into_iter()
                        .map(|i| i.with_target(&project_id, &workspace_id))
                        .collect();
                    if let Err(e) = self.mirror.upsert_all(&stamped) {
                        self.report_error(format!("Failed to stamp issues for {}: {}", repo, e));
                    }

                    let results = join_all(stamped.iter().map(|i| self.reconcile_one(i))).await;
                    for result in &results {
                        report.record(result);
                    }
                }
                None => {
                    tracing::debug!(
                        repo = %repo,
                        workspace = %binding.workspace,
                        project = %binding.project,
                        "Binding targets an unmonitored workspace/project, skipping"
                    );
                    report.skipped += issues.len();
                }
            },
            Err(e) => {
                report.failed += 1;
                report.errors.push(e.to_string());
                self.report_error(format!("Failed to read mirrored issues for {}: {}", repo, e));
            }
        }

        match self.hooks.ensure_hook(&repo).await {
            Ok(outcome) => {
                if let HookOutcome::Created(_) | HookOutcome::Adopted(_) = outcome {
                    self.send_event(SyncEvent::HookEnsured {
                        repo: repo.to_string(),
                    });
                }
                report.hooks_ensured += 1;
            }
            Err(e) => {
                metrics::record_api_error("hook", "github");
                report.hook_failures += 1;
                report.errors.push(e.to_string());
                self.report_error(format!("Failed to ensure hook for {}: {}", repo, e));
            }
        }

        report
    }

    fn bound_issues(&self, repo: &RepoRef, binding: &RepoBinding) -> Result<Vec<Issue>> {
        self.mirror
            .find(&repo_filter(repo).eq("$.assignee.login", &binding.github_user))
    }

    /// Reconcile one issue that already carries its target ids
    pub async fn reconcile_one(&self, issue: &Issue) -> Result<ReconcileAction> {
        let result = self.reconciler.reconcile(issue).await;
        match &result {
            Ok(action) => self.send_event(SyncEvent::IssueReconciled {
                issue: issue.key(),
                action: action.kind(),
                task_id: action.task_id().to_string(),
            }),
            Err(e) => self.send_event(SyncEvent::Error {
                message: format!("Failed to reconcile {}: {}", issue.key(), e),
            }),
        }
        result
    }

    /// Mirror an issue delivered out of band and reconcile it
    ///
    /// Returns `Ok(None)` when no binding covers the issue or its binding
    /// targets an unmonitored workspace/project.
    pub async fn accept_issue(&self, issue: Issue) -> Result<Option<ReconcileAction>> {
        self.mirror.upsert(&issue)?;

        let Some(binding) = self.binding_for(&issue) else {
            tracing::debug!(issue = %issue.key(), "No binding covers issue, ignoring");
            return Ok(None);
        };

        let directory = Directory::from_mirror(&self.mirror, &self.config.bindings)?;
        let Some((project_id, workspace_id)) = directory.resolve(binding) else {
            tracing::debug!(issue = %issue.key(), "Issue targets an unmonitored project, skipping");
            return Ok(None);
        };

        let stamped = issue.with_target(project_id, workspace_id);
        self.mirror.upsert(&stamped)?;
        self.reconcile_one(&stamped).await.map(Some)
    }

    /// Reconcile an issue that is already mirrored
    pub async fn reconcile_mirrored(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Option<ReconcileAction>> {
        let issue = self
            .mirror
            .find::<Issue>(&repo_filter(repo).eq("$.number", number))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                HashiError::Other(format!("Issue {}#{} is not mirrored; run a sync first", repo, number))
            })?;
        self.accept_issue(issue).await
    }

    fn binding_for(&self, issue: &Issue) -> Option<&RepoBinding> {
        let repo = issue.repo.to_string();
        self.config
            .bindings
            .iter()
            .find(|b| b.repo == repo && issue.assignee_login() == Some(b.github_user.as_str()))
    }

    /// Run cycles until shutdown (command, channel close, or SIGTERM/SIGINT)
    pub async fn run(&self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .lock()
            .map_err(|_| HashiError::Other("Orchestrator state poisoned".to_string()))?
            .take()
            .ok_or_else(|| HashiError::Config("Orchestrator already running".to_string()))?;

        metrics::set_health_status(true);
        self.send_event(SyncEvent::Started);
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Orchestrator started"
        );

        let mut shutdown = ShutdownSignal::new()?;

        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                cmd = command_rx.recv() => match cmd {
                    Some(SyncCommand::SyncNow) => {
                        tracing::info!("Sync requested");
                    }
                    Some(SyncCommand::Shutdown) | None => {
                        tracing::info!("Received shutdown command");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Received shutdown signal, stopping");
                    break;
                }
            }
        }

        metrics::set_health_status(false);
        self.send_event(SyncEvent::Stopped);
        Ok(())
    }
}

/// SIGTERM/SIGINT on unix, Ctrl-C elsewhere
struct ShutdownSignal {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate()).map_err(|e| {
            HashiError::Other(format!("Failed to set up SIGTERM handler: {}", e))
        })?;
        let sigint = signal(SignalKind::interrupt()).map_err(|e| {
            HashiError::Other(format!("Failed to set up SIGINT handler: {}", e))
        })?;
        Ok(Self { sigterm, sigint })
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => {}
            _ = self.sigint.recv() => {}
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> RepoBinding {
        RepoBinding::new("W", "P", "acme/widgets", "alice")
    }

    #[test]
    fn test_directory_resolution() {
        let mut directory = Directory::default();
        let workspace = Workspace::new("1", "W");
        directory.insert_workspace(&workspace);
        directory.insert_project("W", &Project::new("10", "P", &workspace));

        assert_eq!(
            directory.resolve(&binding()),
            Some(("10".to_string(), "1".to_string()))
        );
        assert_eq!(
            directory.resolve(&RepoBinding::new("W", "Other", "acme/widgets", "alice")),
            None
        );
        assert_eq!(
            directory.resolve(&RepoBinding::new("X", "P", "acme/widgets", "alice")),
            None
        );
    }

    #[test]
    fn test_directory_from_mirror() {
        let mirror = Mirror::in_memory().unwrap();
        let w = Workspace::new("1", "W");
        let other = Workspace::new("2", "Elsewhere");
        mirror.upsert_all(&[w.clone(), other.clone()]).unwrap();
        mirror
            .upsert_all(&[Project::new("10", "P", &w), Project::new("20", "P", &other)])
            .unwrap();

        let directory = Directory::from_mirror(&mirror, &[binding()]).unwrap();
        assert_eq!(directory.workspace_count(), 1);
        assert_eq!(
            directory.resolve(&binding()),
            Some(("10".to_string(), "1".to_string()))
        );
    }

    #[test]
    fn test_project_without_workspace_is_ignored() {
        let mirror = Mirror::in_memory().unwrap();
        mirror.upsert(&Workspace::new("1", "W")).unwrap();
        let mut orphan = Project::new("10", "P", &Workspace::new("1", "W"));
        orphan.workspace = None;
        mirror.upsert(&orphan).unwrap();

        let directory = Directory::from_mirror(&mirror, &[binding()]).unwrap();
        assert_eq!(directory.project_count(), 0);
    }

    #[test]
    fn test_report_status() {
        let mut report = CycleReport::default();
        assert_eq!(report.status(), "success");
        report.record(&Err(HashiError::Unresolved("acme/widgets#1".to_string())));
        assert_eq!(report.status(), "partial");
        report.aborted = true;
        assert_eq!(report.status(), "failed");
    }

    #[test]
    fn test_config_from_file_settings() {
        let mut file = HashiConfig::new();
        file.bindings.push(binding());
        file.poll_interval_secs = 60;
        file.webhook.public_url = "http://sync.example.com".to_string();

        let config = OrchestratorConfig::from(&file);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.callback_url, "http://sync.example.com/webhook");
        assert_eq!(config.bindings.len(), 1);
    }
}
