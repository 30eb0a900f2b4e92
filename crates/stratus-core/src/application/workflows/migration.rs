//! Instance migration between two cells.
//!
//! `create_migration → Attach(target) → Detach(source) → Notify(target)`,
//! strictly in that order, single pass. The migration record is the commit
//! point: any later failure cancels it with a reason naming the failed step.
//! An instance is never detached from its source before the target accepted
//! it, and a failed detach is not followed by a re-attach.
//!
//! The final step is a `MigrationNotify` with no reply. Completion arrives
//! later as an `InstanceMigratedEvent`.

use async_trait::async_trait;
use tracing::info;

use super::{instance_list, invalid_state};
use crate::application::compensation::{CompensationLog, UndoAction};
use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::address::{CellName, Destination};
use crate::domain::envelope::{keys, Envelope, MessageKind};
use crate::domain::records::InstanceId;
use crate::error::{CoreError, ForwardError, OperationError};

/// Handler for `MigrateInstanceRequest`
pub struct MigrationWorkflow;

#[async_trait]
impl OperationHandler for MigrationWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let outcome = run(ctx, &request).await;
        ctx.finish(&request, MessageKind::MigrateInstanceResponse, outcome).await
    }
}

/// Cancel reason for a failed attach or detach step
fn step_failure(step: &str, err: &ForwardError) -> String {
    match err {
        ForwardError::Timeout => format!("{} instance timeout", step),
        other => format!("{} instance fail: {}", step, other),
    }
}

fn id_strings(instances: &[InstanceId]) -> Vec<String> {
    instances.iter().map(|id| id.0.clone()).collect()
}

async fn run(ctx: &mut SessionContext, request: &Envelope) -> Result<Envelope, OperationError> {
    let source = CellName::parse(request.string(keys::SOURCE_CELL)?)?;
    let target = CellName::parse(request.string(keys::TARGET_CELL)?)?;
    if source == target {
        return Err(OperationError::Malformed(format!(
            "source and target are both {}",
            source
        )));
    }
    let instances = instance_list(request, keys::INSTANCES)?;

    for id in &instances {
        let status = ctx.authority().get_instance_status(id).await?;
        if status.cell != source {
            return Err(invalid_state(format!("instance {} is not on {}", id, source)));
        }
    }

    let migration = ctx
        .authority()
        .create_migration(&source, &target, instances.clone())
        .await?;
    let mut log = CompensationLog::new();
    log.commit(UndoAction::CancelMigration(migration.clone()));

    let attach = ctx
        .request(MessageKind::AttachInstanceRequest)
        .with(keys::INSTANCES, id_strings(&instances))
        .with(keys::IMMEDIATE, false)
        .with(keys::MIGRATION, migration.0.clone())
        .with(keys::SOURCE_CELL, source.to_string());
    if let Err(e) = ctx
        .forward_and_wait(attach, &Destination::cell(&target), MessageKind::AttachInstanceResponse)
        .await
    {
        log.unwind(ctx, &step_failure("attach", &e)).await;
        return Err(e.into());
    }

    let detach = ctx
        .request(MessageKind::DetachInstanceRequest)
        .with(keys::INSTANCES, id_strings(&instances))
        .with(keys::MIGRATION, migration.0.clone())
        .with(keys::TARGET_CELL, target.to_string());
    if let Err(e) = ctx
        .forward_and_wait(detach, &Destination::cell(&source), MessageKind::DetachInstanceResponse)
        .await
    {
        log.unwind(ctx, &step_failure("detach", &e)).await;
        return Err(e.into());
    }

    let notify = ctx
        .request(MessageKind::MigrationNotify)
        .with(keys::INSTANCES, id_strings(&instances))
        .with(keys::MIGRATION, migration.0.clone())
        .with(keys::SOURCE_CELL, source.to_string());
    if let Err(e) = ctx.send(notify, &Destination::cell(&target)).await {
        log.unwind(ctx, &format!("send migrate request fail: {}", e)).await;
        return Err(OperationError::Transport(e.to_string()));
    }

    info!(
        session = %ctx.id(),
        migration = %migration,
        source = %source,
        target = %target,
        instances = instances.len(),
        "Migration started"
    );
    Ok(ctx
        .reply_for(request, MessageKind::MigrateInstanceResponse)
        .with(keys::MIGRATION, migration.0))
}
