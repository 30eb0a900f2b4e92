//!
//! Stratus Core - session-scoped orchestration for the cluster control plane
//!
//! Every inbound request or event runs as its own session: a task with a
//! private inbox that only receives replies correlated to it. Workflows
//! forward sub-requests to cells and image servers, wait for exactly one
//! reply each, and unwind committed steps when a later step fails.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - envelopes, records and the consumed interfaces
pub mod domain;

/// Application services - sessions, the orchestrator and workflows
pub mod application;

/// Runtime configuration
pub mod config;

/// Error types
pub mod error;

#[cfg(test)]
mod testing;

// Re-export main API types for easy use
pub use application::compensation::{CompensationLog, UndoAction};
pub use application::forward::forward_and_wait;
pub use application::orchestrator::{
    OperationHandler, Orchestrator, OrchestratorBuilder, SessionContext, DEFAULT_IDENTITY,
};
pub use application::session::{Session, SessionRouter};
pub use config::OrchestratorConfig;
pub use domain::address::{CellName, Destination, SELF_DESTINATION};
pub use domain::authority::ResourceAuthority;
pub use domain::envelope::{keys, Envelope, MessageKind, SessionId, TransactionId, Value};
pub use domain::transport::Transport;
pub use error::{AuthorityError, CoreError, ForwardError, OperationError, TransportError};
