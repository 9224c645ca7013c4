//! Reconciliation engine
//!
//! - `linker`: finds the task linked to an issue through its correlation tag
//! - `reconciler`: creates or updates that task so it matches the issue
//! - `hooks`: keeps one change-notification hook on every bound repository
//! - `orchestrator`: periodic full syncs plus out-of-band single issues

pub mod hooks;
pub mod linker;
pub mod locks;
pub mod metrics;
pub mod orchestrator;
pub mod reconciler;

pub use hooks::{HookOutcome, HookRegistrar, HOOK_EVENTS};
pub use linker::{tag_query, IdentityLinker};
pub use locks::{IssueGuard, IssueLocks};
pub use orchestrator::{
    CycleReport, Directory, Orchestrator, OrchestratorConfig, SyncCommand, SyncEvent,
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_POLL_INTERVAL,
};
pub use reconciler::{diff, new_task_for, ReconcileAction, Reconciler};
