//! Moves a cell's guest storage to another directory.
//!
//! The cell switches first. If the authority then refuses to record the new
//! path, the cell is switched back to the previous one.

use async_trait::async_trait;
use tracing::{debug, info};

use super::invalid_state;
use crate::application::compensation::{CompensationLog, UndoAction};
use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::address::{CellName, Destination};
use crate::domain::envelope::{keys, Envelope, MessageKind};
use crate::error::{CoreError, OperationError};

/// Handler for `ModifyStoragePathRequest`
pub struct ChangeStoragePathWorkflow;

#[async_trait]
impl OperationHandler for ChangeStoragePathWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let outcome = run(ctx, &request).await;
        ctx.finish(&request, MessageKind::ModifyStoragePathResponse, outcome).await
    }
}

async fn run(ctx: &mut SessionContext, request: &Envelope) -> Result<Envelope, OperationError> {
    let cell = CellName::parse(request.string(keys::CELL)?)?;
    let path = request.string(keys::PATH)?.to_string();
    if !path.starts_with('/') {
        return Err(OperationError::Malformed(format!("storage path '{}' must be absolute", path)));
    }

    let status = ctx.authority().get_cell_status(&cell).await?;
    if !status.alive {
        return Err(invalid_state(format!("cell {} is disconnected", cell)));
    }

    let reply = ctx
        .reply_for(request, MessageKind::ModifyStoragePathResponse)
        .with(keys::CELL, cell.to_string())
        .with(keys::PATH, path.clone());
    if status.storage_path == path {
        debug!(session = %ctx.id(), cell = %cell, path = %path, "Storage path unchanged");
        return Ok(reply);
    }

    let forward = ctx
        .request(MessageKind::ModifyStoragePathRequest)
        .with(keys::PATH, path.clone());
    ctx.forward_and_wait(forward, &Destination::cell(&cell), MessageKind::ModifyStoragePathResponse)
        .await?;

    let mut log = CompensationLog::new();
    log.commit(UndoAction::RestoreStoragePath {
        cell: cell.clone(),
        path: status.storage_path.clone(),
    });

    if let Err(e) = ctx.authority().update_cell_storage_path(&cell, &path).await {
        let err = OperationError::from(e);
        log.unwind(ctx, &format!("update storage path fail: {}", err)).await;
        return Err(err);
    }

    info!(
        session = %ctx.id(),
        cell = %cell,
        from = %status.storage_path,
        to = %path,
        "Storage path changed"
    );
    Ok(reply)
}
