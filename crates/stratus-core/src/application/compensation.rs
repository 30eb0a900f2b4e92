//! Compensation log for multi-step workflows.
//!
//! A workflow records an [`UndoAction`] at every commit point. When a later
//! step fails, [`CompensationLog::unwind`] runs the recorded actions newest
//! first, before the failure reply goes out. Undo failures are logged and do
//! not stop the remaining actions.

use tracing::{error, info};

use super::orchestrator::SessionContext;
use crate::domain::address::{CellName, Destination};
use crate::domain::envelope::{keys, MessageKind};
use crate::domain::records::{InstanceId, MigrationId};

/// Undo action for one committed side effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// Release an allocated instance record
    DeallocateInstance(InstanceId),

    /// Remove an image record from its image server
    DeleteDiskImage {
        /// Image server hosting the record
        server: String,
        /// Image id
        image: String,
    },

    /// Roll back a migration record
    CancelMigration(MigrationId),

    /// Put a cell back on its previous storage path
    RestoreStoragePath {
        /// Cell that was switched
        cell: CellName,
        /// Path in use before the change
        path: String,
    },
}

impl UndoAction {
    fn describe(&self) -> String {
        match self {
            UndoAction::DeallocateInstance(id) => format!("deallocate instance {}", id),
            UndoAction::DeleteDiskImage { server, image } => {
                format!("delete image {} on {}", image, server)
            }
            UndoAction::CancelMigration(id) => format!("cancel migration {}", id),
            UndoAction::RestoreStoragePath { cell, path } => {
                format!("restore storage path '{}' on {}", path, cell)
            }
        }
    }
}

/// Ordered record of committed side effects
#[derive(Debug, Default)]
pub struct CompensationLog {
    committed: Vec<UndoAction>,
}

impl CompensationLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed step and the action that reverts it
    pub fn commit(&mut self, undo: UndoAction) {
        self.committed.push(undo);
    }

    /// Number of committed steps
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    /// Whether nothing has been committed
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Revert every committed step, newest first.
    ///
    /// Returns the number of undo actions that succeeded.
    pub async fn unwind(self, ctx: &mut SessionContext, reason: &str) -> usize {
        if self.is_empty() {
            return 0;
        }
        info!(session = %ctx.id(), steps = self.len(), reason, "Unwinding committed steps");

        let mut reverted = 0;
        for action in self.committed.into_iter().rev() {
            let description = action.describe();
            match run_undo(ctx, action, reason).await {
                Ok(()) => {
                    info!(session = %ctx.id(), action = %description, reason, "Compensated");
                    reverted += 1;
                }
                Err(e) => {
                    error!(
                        session = %ctx.id(),
                        action = %description,
                        reason,
                        error = %e,
                        "Compensation failed, manual cleanup required"
                    );
                }
            }
        }
        reverted
    }
}

async fn run_undo(
    ctx: &mut SessionContext,
    action: UndoAction,
    reason: &str,
) -> Result<(), String> {
    match action {
        UndoAction::DeallocateInstance(id) => ctx
            .authority()
            .deallocate_instance(&id)
            .await
            .map_err(|e| e.to_string()),
        UndoAction::CancelMigration(id) => ctx
            .authority()
            .cancel_migration(&id, reason)
            .await
            .map_err(|e| e.to_string()),
        UndoAction::DeleteDiskImage { server, image } => {
            let request = ctx
                .request(MessageKind::DeleteDiskImageRequest)
                .with(keys::IMAGE, image);
            ctx.forward_and_wait(
                request,
                &Destination::Node(server),
                MessageKind::DeleteDiskImageResponse,
            )
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
        }
        UndoAction::RestoreStoragePath { cell, path } => {
            let request = ctx
                .request(MessageKind::ModifyStoragePathRequest)
                .with(keys::PATH, path);
            ctx.forward_and_wait(
                request,
                &Destination::cell(&cell),
                MessageKind::ModifyStoragePathResponse,
            )
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
        }
    }
}
