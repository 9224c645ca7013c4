//! Hashi - GitHub issue to Asana task sync
//!
//! Main entry point for the hashi CLI.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use hashi::config::{validate_config, validate_config_result, HashiConfig};
use hashi::integrations::{AsanaAdapter, GitHubAdapter, IssueTracker, TaskTracker};
use hashi::mirror::{repo_filter, Mirror, MirrorConfig};
use hashi::model::{Issue, RepoRef, Task};
use hashi::sync::{CycleReport, HookOutcome, Orchestrator, OrchestratorConfig, ReconcileAction};
use hashi::webhook::WebhookServer;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Hashi - keeps Asana tasks in sync with GitHub issues
#[derive(Parser, Debug)]
#[command(name = "hashi")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/hashi/config.yaml)
    #[arg(short, long, env = "HASHI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration and print every problem found
    Validate,

    /// Run the sync daemon: periodic cycles plus the webhook listener
    Run,

    /// Run exactly one sync cycle
    Sync,

    /// Reconcile one mirrored issue now
    Reconcile {
        /// Repository (owner/name)
        repo: String,

        /// Issue number
        number: u64,
    },

    /// Manage repository hooks
    #[command(subcommand)]
    Hooks(HookCommands),

    /// List the comments on an issue
    Comments {
        /// Repository (owner/name)
        repo: String,

        /// Issue number
        number: u64,
    },

    /// List the stories on a task
    Stories {
        /// Task id
        task_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum HookCommands {
    /// Register the sync hook on a repository if it is missing
    Ensure {
        /// Repository (owner/name)
        repo: String,
    },

    /// List the hooks a repository has
    List {
        /// Repository (owner/name)
        repo: String,
    },

    /// Delete a hook
    Delete {
        /// Repository (owner/name)
        repo: String,

        /// Hook id
        id: u64,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = hashi::logging::init("info") {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(HashiConfig::default_path);

    if let Commands::Init { force } = cli.command {
        return handle_init(&config_path, force);
    }

    let config = HashiConfig::load(&config_path).with_context(|| {
        format!(
            "Could not load {}. Run 'hashi init' first to create one.",
            config_path.display()
        )
    })?;

    if let Commands::Validate = cli.command {
        return handle_validate(&config);
    }

    validate_config_result(&config)?;
    let services = Services::connect(&config)?;

    match cli.command {
        Commands::Init { .. } | Commands::Validate => Ok(()),
        Commands::Run => handle_run(&config, services).await,
        Commands::Sync => {
            let report = services.orchestrator(&config).run_cycle().await;
            print_report(&report);
            if report.aborted {
                bail!("sync cycle aborted: {}", report.errors.join("; "));
            }
            Ok(())
        }
        Commands::Reconcile { repo, number } => {
            let repo: RepoRef = repo.parse()?;
            let orchestrator = services.orchestrator(&config);
            match orchestrator.reconcile_mirrored(&repo, number).await? {
                Some(action) => print_action(&repo, number, &action),
                None => println!("{}#{} is not covered by a monitored binding", repo, number),
            }
            Ok(())
        }
        Commands::Hooks(command) => handle_hooks(&config, services, command).await,
        Commands::Comments { repo, number } => {
            let repo: RepoRef = repo.parse()?;
            handle_comments(&services, &repo, number).await
        }
        Commands::Stories { task_id } => handle_stories(&services, &task_id).await,
    }
}

/// Adapters and mirror built from a validated config
struct Services {
    mirror: Mirror,
    issues: Arc<GitHubAdapter>,
    tasks: Arc<AsanaAdapter>,
}

impl Services {
    fn connect(config: &HashiConfig) -> anyhow::Result<Self> {
        let asana_token = config.asana_token()?;
        let github_token = config.github_token()?;

        let tasks = AsanaAdapter::new(&config.asana, asana_token)
            .context("Failed to create Asana client")?;
        let issues = GitHubAdapter::new(&config.github)
            .context("Failed to create GitHub client")?
            .with_token(github_token);
        let mirror = Mirror::open(&MirrorConfig::from(&config.mirror))
            .context("Failed to open mirror database")?;

        Ok(Self {
            mirror,
            issues: Arc::new(issues),
            tasks: Arc::new(tasks),
        })
    }

    fn orchestrator(&self, config: &HashiConfig) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig::from(config),
            self.tasks.clone(),
            self.issues.clone(),
            self.mirror.clone(),
        )
    }
}

fn handle_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    HashiConfig::example()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the bindings and webhook.public_url");
    println!("  2. export ASANA_TOKEN=... GITHUB_TOKEN=...");
    println!("  3. hashi validate && hashi run");
    Ok(())
}

fn handle_validate(config: &HashiConfig) -> anyhow::Result<()> {
    match validate_config(config) {
        Ok(()) => {
            println!("Configuration OK ({} bindings)", config.bindings.len());
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("  - {}", error);
            }
            bail!("{} configuration problem(s)", errors.len())
        }
    }
}

async fn handle_run(config: &HashiConfig, services: Services) -> anyhow::Result<()> {
    let orchestrator = Arc::new(services.orchestrator(config));
    let server = WebhookServer::new(orchestrator.clone(), &config.webhook);

    println!(
        "Syncing {} binding(s) every {}s; listening on {} for {}",
        config.bindings.len(),
        config.poll_interval_secs,
        config.webhook.listen_addr(),
        config.callback_url()
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut serving = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    let outcome = tokio::select! {
        result = orchestrator.run() => result.context("Orchestrator failed"),
        joined = &mut serving => {
            return joined
                .context("Webhook listener panicked")?
                .context("Webhook listener failed");
        }
    };

    // Stop accepting deliveries and let the ones already accepted finish
    let _ = stop_tx.send(());
    serving
        .await
        .context("Webhook listener panicked")?
        .context("Webhook listener failed")?;
    outcome?;

    println!("Stopped");
    Ok(())
}

async fn handle_hooks(
    config: &HashiConfig,
    services: Services,
    command: HookCommands,
) -> anyhow::Result<()> {
    let orchestrator = services.orchestrator(config);
    let hooks = orchestrator.hooks();

    match command {
        HookCommands::Ensure { repo } => {
            let repo: RepoRef = repo.parse()?;
            match hooks.ensure_hook(&repo).await? {
                HookOutcome::Mirrored(hook) => println!("{}: hook {} already registered", repo, hook.id),
                HookOutcome::Created(hook) => println!("{}: created hook {}", repo, hook.id),
                HookOutcome::Adopted(hook) => println!("{}: adopted existing hook {}", repo, hook.id),
                HookOutcome::AlreadyExists => println!("{}: hook already exists", repo),
            }
        }
        HookCommands::List { repo } => {
            let repo: RepoRef = repo.parse()?;
            let remote = hooks.list_remote(&repo).await?;
            if remote.is_empty() {
                println!("{}: no hooks", repo);
            }
            for hook in remote {
                let marker = if hook.url == hooks.callback_url() { "*" } else { " " };
                println!(
                    "{} {:>10}  {:<8} {}  [{}]",
                    marker,
                    hook.id,
                    if hook.active { "active" } else { "inactive" },
                    hook.url,
                    hook.events.join(",")
                );
            }
        }
        HookCommands::Delete { repo, id } => {
            let repo: RepoRef = repo.parse()?;
            hooks.remove(&repo, id).await?;
            println!("{}: deleted hook {}", repo, id);
        }
    }
    Ok(())
}

async fn handle_comments(services: &Services, repo: &RepoRef, number: u64) -> anyhow::Result<()> {
    let issue = services
        .mirror
        .find::<Issue>(&repo_filter(repo).eq("$.number", number))?
        .into_iter()
        .next()
        .unwrap_or_else(|| Issue::new(0, number, "", repo.clone()));

    let comments = services.issues.list_comments(&issue).await?;
    services.mirror.upsert_all(&comments)?;

    println!("{}#{}: {} comment(s)", repo, number, comments.len());
    for comment in comments {
        let author = comment.user.as_ref().map(|u| u.login.as_str()).unwrap_or("-");
        let when = comment
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!();
        println!("{} {}", author, when);
        println!("{}", comment.body);
    }
    Ok(())
}

async fn handle_stories(services: &Services, task_id: &str) -> anyhow::Result<()> {
    let task = services
        .mirror
        .get::<Task>(task_id)?
        .unwrap_or_else(|| Task::new(task_id, ""));

    let stories = services.tasks.list_stories(&task).await?;
    services.mirror.upsert_all(&stories)?;

    println!("Task {}: {} stor(ies)", task_id, stories.len());
    for story in stories {
        let kind = story.story_type.as_deref().unwrap_or("story");
        let when = story
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("  [{}] {} {}", kind, when, story.text.as_deref().unwrap_or(""));
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("Sync cycle: {}", report.status());
    println!(
        "  mirrored: {} workspace(s), {} project(s), {} task(s), {} issue(s)",
        report.workspaces, report.projects, report.tasks, report.issues
    );
    println!(
        "  tasks: {} created, {} updated, {} unchanged, {} skipped, {} failed",
        report.created, report.updated, report.unchanged, report.skipped, report.failed
    );
    println!(
        "  hooks: {} ensured, {} failed",
        report.hooks_ensured, report.hook_failures
    );
    for error in &report.errors {
        println!("  error: {}", error);
    }
}

fn print_action(repo: &RepoRef, number: u64, action: &ReconcileAction) {
    match action {
        ReconcileAction::Created(task) => println!("{}#{}: created task {}", repo, number, task.id),
        ReconcileAction::Updated { task, changed } => {
            println!("{}#{}: updated task {} ({:?})", repo, number, task.id, changed)
        }
        ReconcileAction::NoOp { task_id } => {
            println!("{}#{}: task {} already in sync", repo, number, task_id)
        }
    }
}
