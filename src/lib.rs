//! Hashi - keeps Asana tasks in sync with GitHub issues
//!
//! Every issue assigned to a bound user in a bound repository gets exactly
//! one task in the bound project. Titles, bodies and completion flow from the
//! issue to the task; nothing flows back.
//!
//! # Architecture
//!
//! - **config**: YAML configuration, repository bindings, credentials
//! - **model**: tracker-neutral records (Issue, Task, Hook, ...)
//! - **integrations**: `IssueTracker`/`TaskTracker` adapters (GitHub, Asana, in-memory)
//! - **mirror**: local SQLite copy of both trackers with full-text search
//! - **sync**: linker, reconciler, hook registrar and the orchestrator
//! - **webhook**: inbound HTTP listener for issue deliveries

pub mod config;
pub mod error;
pub mod integrations;
pub mod logging;
pub mod mirror;
pub mod model;
pub mod sync;
pub mod webhook;

// Re-exports
pub use error::{HashiError, Result};
