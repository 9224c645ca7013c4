//! Inbound change notifications
//!
//! The listener accepts issue deliveries, hands each one to the orchestrator
//! without waiting for it, and always answers 200 so the sender never
//! redelivers.

mod server;

pub use server::{parse_delivery, WebhookServer, DEFAULT_MAX_BODY_SIZE};
