//! Configuration validation
//!
//! Validates a Hashi configuration for correctness:
//! - At least one binding, each with a well-formed `owner/name` repository
//! - No duplicate repository/user bindings
//! - Valid endpoint urls, port and poll interval
//!
//! Projects fed by several repositories are logged as a warning.

use super::hashi_config::{HashiConfig, RepoBinding};
use crate::HashiError;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub binding: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            binding: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn for_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref binding) = self.binding {
            write!(f, "[{}] {}: {}", binding, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a Hashi configuration, collecting every problem
pub fn validate_config(config: &HashiConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.bindings.is_empty() {
        errors.push(ValidationError::new(
            "bindings",
            "At least one binding must be defined",
        ));
    }

    let mut seen = HashSet::new();
    for (index, binding) in config.bindings.iter().enumerate() {
        errors.extend(validate_binding(index, binding));

        let key = (binding.repo.trim().to_string(), binding.github_user.clone());
        if !seen.insert(key) {
            errors.push(ValidationError::new(
                "bindings",
                format!(
                    "Duplicate binding for {} and user {}",
                    binding.repo, binding.github_user
                ),
            ));
        }
    }

    for (field, url) in [
        ("asana.url", &config.asana.url),
        ("github.url", &config.github.url),
        ("webhook.public_url", &config.webhook.public_url),
    ] {
        if !is_http_url(url) {
            errors.push(ValidationError::new(
                field,
                format!("Invalid URL '{}': must start with http:// or https://", url),
            ));
        }
    }

    if config.webhook.port == 0 {
        errors.push(ValidationError::new(
            "webhook.port",
            "Port must be greater than 0",
        ));
    }

    if !config.webhook.path.starts_with('/') {
        errors.push(ValidationError::new(
            "webhook.path",
            format!("Path '{}' must start with '/'", config.webhook.path),
        ));
    }

    for (target, repos) in shared_projects(config) {
        tracing::warn!(
            project = %target,
            repos = %repos.join(", "),
            "Several repositories feed one project; tasks are told apart by issue url"
        );
    }

    if config.poll_interval_secs == 0 {
        errors.push(ValidationError::new(
            "poll_interval_secs",
            "Poll interval must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a configuration and convert failures into a single error
pub fn validate_config_result(config: &HashiConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        HashiError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}

fn validate_binding(index: usize, binding: &RepoBinding) -> Vec<ValidationError> {
    let label = format!("binding {}", index);
    let mut errors = Vec::new();

    if let Err(e) = binding.repo_ref() {
        errors.push(ValidationError::new("repo", e.to_string()).for_binding(&label));
    }

    for (field, value) in [
        ("workspace", &binding.workspace),
        ("project", &binding.project),
        ("github_user", &binding.github_user),
    ] {
        if value.trim().is_empty() {
            errors.push(ValidationError::new(field, "Must not be empty").for_binding(&label));
        }
    }

    errors
}

/// Projects fed by more than one repository, as `workspace/project` with the repositories
pub fn shared_projects(config: &HashiConfig) -> Vec<(String, Vec<String>)> {
    let mut targets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for binding in &config.bindings {
        targets
            .entry(format!("{}/{}", binding.workspace, binding.project))
            .or_default()
            .insert(binding.repo.trim().to_string());
    }

    targets
        .into_iter()
        .filter(|(_, repos)| repos.len() > 1)
        .map(|(target, repos)| (target, repos.into_iter().collect()))
        .collect()
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> HashiConfig {
        let mut config = HashiConfig::new();
        config
            .bindings
            .push(RepoBinding::new("W", "P", "acme/widgets", "alice"));
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_empty_bindings() {
        let errors = validate_config(&HashiConfig::new()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "bindings"));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = valid_config();
        config.bindings.push(RepoBinding::new("", "P", "not-a-repo", "bob"));
        config.bindings.push(RepoBinding::new("W", "P", "acme/widgets", "alice"));
        config.webhook.public_url = "ftp://example.com".to_string();
        config.poll_interval_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"repo"));
        assert!(fields.contains(&"workspace"));
        assert!(fields.contains(&"bindings"));
        assert!(fields.contains(&"webhook.public_url"));
        assert!(fields.contains(&"poll_interval_secs"));
    }

    #[test]
    fn test_shared_projects() {
        let mut config = valid_config();
        config.bindings.push(RepoBinding::new("W", "P", "acme/widgets", "bob"));
        assert!(shared_projects(&config).is_empty());

        config.bindings.push(RepoBinding::new("W", "P", "acme/gadgets", "alice"));
        config.bindings.push(RepoBinding::new("W", "Q", "acme/tools", "alice"));
        let shared = shared_projects(&config);
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].0, "W/P");
        assert_eq!(shared[0].1, vec!["acme/gadgets", "acme/widgets"]);

        // a warning, not an error
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_error_display_includes_binding() {
        let err = ValidationError::new("repo", "bad").for_binding("binding 2");
        assert_eq!(err.to_string(), "[binding 2] repo: bad");
    }

    #[test]
    fn test_result_wrapper() {
        let err = validate_config_result(&HashiConfig::new()).unwrap_err();
        assert!(err.to_string().contains("At least one binding"));
    }
}
