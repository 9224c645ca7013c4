//! Repository hook registration
//!
//! Every bound repository gets one `issues` hook pointing at this service.
//! Hooks are created once and never removed automatically.

use crate::integrations::IssueTracker;
use crate::mirror::{repo_filter, Mirror};
use crate::model::{Hook, RepoRef};
use crate::{HashiError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Events the registered hook subscribes to
pub const HOOK_EVENTS: &[&str] = &["issues"];

/// How `ensure_hook` satisfied its postcondition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// A hook for the repository was already mirrored; no remote call made
    Mirrored(Hook),
    Created(Hook),
    /// The remote already had our hook; it is now mirrored too
    Adopted(Hook),
    /// The remote reported an existing hook that could not be adopted
    AlreadyExists,
}

pub struct HookRegistrar {
    issues: Arc<dyn IssueTracker>,
    mirror: Mirror,
    callback_url: String,
}

impl HookRegistrar {
    pub fn new(issues: Arc<dyn IssueTracker>, mirror: Mirror, callback_url: impl Into<String>) -> Self {
        Self {
            issues,
            mirror,
            callback_url: callback_url.into(),
        }
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Make sure `repo` has a hook delivering to this service
    ///
    /// "Already exists" from the remote counts as success. Any other failure
    /// is returned for the caller to report.
    pub async fn ensure_hook(&self, repo: &RepoRef) -> Result<HookOutcome> {
        if let Some(hook) = self.mirrored(repo)?.into_iter().next() {
            debug!(repo = %repo, hook_id = hook.id, "Hook already mirrored");
            return Ok(HookOutcome::Mirrored(hook));
        }

        match self
            .issues
            .create_webhook(repo, HOOK_EVENTS, &self.callback_url)
            .await
        {
            Ok(hook) => {
                self.mirror.upsert(&hook)?;
                info!(repo = %repo, hook_id = hook.id, "Registered hook");
                Ok(HookOutcome::Created(hook))
            }
            Err(HashiError::HookExists { .. }) => Ok(self.adopt(repo).await),
            Err(e) => Err(e),
        }
    }

    /// Mirror the remote hook that targets our callback url
    async fn adopt(&self, repo: &RepoRef) -> HookOutcome {
        let remote = match self.issues.list_webhooks(repo).await {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(repo = %repo, error = %e, "Could not list existing hooks");
                return HookOutcome::AlreadyExists;
            }
        };

        let Some(hook) = remote.into_iter().find(|h| h.url == self.callback_url) else {
            debug!(repo = %repo, "Existing hook targets another url");
            return HookOutcome::AlreadyExists;
        };

        match self.mirror.upsert(&hook) {
            Ok(()) => {
                info!(repo = %repo, hook_id = hook.id, "Adopted existing hook");
                HookOutcome::Adopted(hook)
            }
            Err(e) => {
                warn!(repo = %repo, error = %e, "Could not mirror existing hook");
                HookOutcome::AlreadyExists
            }
        }
    }

    /// Hooks for `repo` in the mirror
    pub fn mirrored(&self, repo: &RepoRef) -> Result<Vec<Hook>> {
        self.mirror.find(&repo_filter(repo))
    }

    /// Hooks for `repo` as the remote sees them
    pub async fn list_remote(&self, repo: &RepoRef) -> Result<Vec<Hook>> {
        self.issues.list_webhooks(repo).await
    }

    /// Delete a hook remotely and forget it locally
    pub async fn remove(&self, repo: &RepoRef, hook_id: u64) -> Result<()> {
        self.issues.delete_webhook(repo, hook_id).await?;
        self.mirror.delete::<Hook>(&hook_id.to_string())?;
        info!(repo = %repo, hook_id = hook_id, "Removed hook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MemoryIssueTracker;

    const CALLBACK: &str = "http://sync.example.com/webhook";

    fn setup() -> (Arc<MemoryIssueTracker>, Mirror, HookRegistrar) {
        let tracker = Arc::new(MemoryIssueTracker::new());
        let mirror = Mirror::in_memory().unwrap();
        let registrar = HookRegistrar::new(tracker.clone(), mirror.clone(), CALLBACK);
        (tracker, mirror, registrar)
    }

    #[tokio::test]
    async fn test_second_ensure_is_local() {
        let (tracker, _mirror, registrar) = setup();
        let repo = RepoRef::new("acme", "widgets");

        let first = registrar.ensure_hook(&repo).await.unwrap();
        assert!(matches!(first, HookOutcome::Created(_)));

        let second = registrar.ensure_hook(&repo).await.unwrap();
        assert!(matches!(second, HookOutcome::Mirrored(_)));

        assert_eq!(tracker.hook_create_calls(), 1);
        assert_eq!(tracker.hooks().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_remote_hook_is_adopted() {
        let (tracker, mirror, registrar) = setup();
        let repo = RepoRef::new("acme", "widgets");
        tracker.add_hook(Hook {
            id: 5,
            repo: repo.clone(),
            url: CALLBACK.to_string(),
            events: vec!["issues".to_string()],
            active: true,
            created_at: None,
        });

        let outcome = registrar.ensure_hook(&repo).await.unwrap();
        assert!(matches!(outcome, HookOutcome::Adopted(ref h) if h.id == 5));
        assert_eq!(mirror.all::<Hook>().unwrap().len(), 1);
        assert_eq!(tracker.hooks().len(), 1);
    }

    #[tokio::test]
    async fn test_other_failures_are_reported() {
        let (tracker, mirror, registrar) = setup();
        let repo = RepoRef::new("acme", "widgets");
        tracker.fail_hooks_for(repo.clone());

        let result = registrar.ensure_hook(&repo).await;
        assert!(matches!(result, Err(HashiError::Remote { status: 500, .. })));
        assert!(mirror.all::<Hook>().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_forgets_hook() {
        let (tracker, mirror, registrar) = setup();
        let repo = RepoRef::new("acme", "widgets");

        let HookOutcome::Created(hook) = registrar.ensure_hook(&repo).await.unwrap() else {
            panic!("expected a new hook");
        };
        registrar.remove(&repo, hook.id).await.unwrap();

        assert!(tracker.hooks().is_empty());
        assert!(mirror.all::<Hook>().unwrap().is_empty());
        assert_eq!(registrar.list_remote(&repo).await.unwrap().len(), 0);
    }
}
