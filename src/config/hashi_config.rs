//! Hashi configuration file handling
//!
//! Loads and manages ~/.config/hashi/config.yaml: repository bindings, tracker
//! endpoints and credentials, the webhook listener and the poll interval.

use crate::model::RepoRef;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maps one repository (and the user whose issues are tracked) onto a
/// workspace/project pair in the task tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoBinding {
    /// Workspace name in the task tracker
    pub workspace: String,

    /// Project name where tasks are created
    pub project: String,

    /// Repository to sync issues from, as `owner/name`
    pub repo: String,

    /// Only issues assigned to this user are synced
    pub github_user: String,
}

impl RepoBinding {
    pub fn new(
        workspace: impl Into<String>,
        project: impl Into<String>,
        repo: impl Into<String>,
        github_user: impl Into<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            project: project.into(),
            repo: repo.into(),
            github_user: github_user.into(),
        }
    }

    /// Parsed repository reference
    pub fn repo_ref(&self) -> Result<RepoRef> {
        self.repo.parse()
    }
}

/// Task tracker endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsanaSettings {
    #[serde(default = "default_asana_url")]
    pub url: String,

    /// Environment variable holding the personal access token
    #[serde(default = "default_asana_token_env")]
    pub token_env: String,
}

fn default_asana_url() -> String {
    asana::DEFAULT_BASE_URL.to_string()
}

fn default_asana_token_env() -> String {
    "ASANA_TOKEN".to_string()
}

impl Default for AsanaSettings {
    fn default() -> Self {
        Self {
            url: default_asana_url(),
            token_env: default_asana_token_env(),
        }
    }
}

/// Issue tracker endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    /// REST API root ("https://api.github.com" or "https://ghe.example.com/api/v3")
    #[serde(default = "default_github_url")]
    pub url: String,

    /// Environment variable holding the API token
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
}

fn default_github_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            url: default_github_url(),
            token_env: default_github_token_env(),
        }
    }
}

/// Inbound webhook listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Public base url the issue tracker delivers to
    pub public_url: String,

    /// Interface to bind
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Route that receives deliveries
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    34567
}

fn default_path() -> String {
    "/webhook".to_string()
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:34567".to_string(),
            bind: default_bind(),
            port: default_port(),
            path: default_path(),
        }
    }
}

impl WebhookSettings {
    /// Full url registered on each repository hook
    pub fn callback_url(&self) -> String {
        format!(
            "{}/{}",
            self.public_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Local mirror settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSettings {
    pub path: PathBuf,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        let mut path = config_dir();
        path.push("mirror.db");
        Self { path }
    }
}

/// Hashi configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashiConfig {
    /// Repository to project bindings
    pub bindings: Vec<RepoBinding>,

    #[serde(default)]
    pub asana: AsanaSettings,

    #[serde(default)]
    pub github: GitHubSettings,

    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Delay between the end of one full sync and the start of the next
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub mirror: MirrorSettings,
}

fn default_poll_interval_secs() -> u64 {
    600
}

/// ~/.config/hashi
fn config_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("hashi");
    path
}

impl Default for HashiConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HashiConfig {
    /// Create a configuration with no bindings
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            asana: AsanaSettings::default(),
            github: GitHubSettings::default(),
            webhook: WebhookSettings::default(),
            poll_interval_secs: default_poll_interval_secs(),
            mirror: MirrorSettings::default(),
        }
    }

    /// Starter configuration written by `hashi init`
    pub fn example() -> Self {
        let mut config = Self::new();
        config.bindings.push(RepoBinding::new(
            "Personal Projects",
            "Issues",
            "owner/repo",
            "your-github-login",
        ));
        config
    }

    /// Load configuration from the default path (~/.config/hashi/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::HashiError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading Hashi configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            bindings = config.bindings.len(),
            poll_interval_secs = config.poll_interval_secs,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving Hashi configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/hashi/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = config_dir();
        path.push("config.yaml");
        path
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn callback_url(&self) -> String {
        self.webhook.callback_url()
    }

    /// Read the task tracker token from its environment variable
    pub fn asana_token(&self) -> Result<String> {
        read_token(&self.asana.token_env)
    }

    /// Read the issue tracker token from its environment variable
    pub fn github_token(&self) -> Result<String> {
        read_token(&self.github.token_env)
    }
}

fn read_token(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(token) if !token.trim().is_empty() => Ok(token),
        _ => Err(crate::HashiError::Auth(format!(
            "Environment variable {} is not set",
            var
        ))),
    }
}
