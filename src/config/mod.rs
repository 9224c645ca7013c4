//! Configuration system
//!
//! Loads ~/.config/hashi/config.yaml with:
//! - Repository bindings (repo + tracked user -> workspace/project)
//! - Task tracker and issue tracker endpoints and token variables
//! - Webhook listener settings and the public callback url
//! - Poll interval and local mirror location

mod hashi_config;
pub mod validation;

pub use hashi_config::{
    AsanaSettings, GitHubSettings, HashiConfig, MirrorSettings, RepoBinding, WebhookSettings,
};
pub use validation::{shared_projects, validate_config, validate_config_result, ValidationError};
