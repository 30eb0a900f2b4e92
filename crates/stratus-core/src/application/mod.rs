/// Session correlation and inboxes
pub mod session;

/// Forward-and-wait primitive
pub mod forward;

/// Intake, handler registry and session context
pub mod orchestrator;

/// Undo log for multi-step workflows
pub mod compensation;

/// Concrete orchestration routines
pub mod workflows;
