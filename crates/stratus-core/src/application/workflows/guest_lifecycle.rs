//! Guest deletion and stop.
//!
//! Both are single-step: the cell acts first, then the authority record is
//! updated. They run standalone and as batch sub-operations.

use async_trait::async_trait;
use tracing::info;

use super::{instance_field, invalid_state};
use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::address::Destination;
use crate::domain::envelope::{keys, Envelope, MessageKind};
use crate::error::{CoreError, OperationError};

/// Handler for `DeleteGuestRequest`
pub struct DeleteGuestWorkflow;

#[async_trait]
impl OperationHandler for DeleteGuestWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let outcome = delete(ctx, &request).await;
        ctx.finish(&request, MessageKind::DeleteGuestResponse, outcome).await
    }
}

async fn delete(ctx: &mut SessionContext, request: &Envelope) -> Result<Envelope, OperationError> {
    let instance_id = instance_field(request, keys::INSTANCE)?;
    let instance = ctx.authority().get_instance_status(&instance_id).await?;
    if instance.running {
        return Err(invalid_state(format!("instance {} is running", instance.id)));
    }

    let forward = ctx
        .request(MessageKind::DeleteGuestRequest)
        .with(keys::INSTANCE, instance.id.0.clone());
    ctx.forward_and_wait(
        forward,
        &Destination::cell(&instance.cell),
        MessageKind::DeleteGuestResponse,
    )
    .await?;

    ctx.authority().deallocate_instance(&instance.id).await?;
    info!(session = %ctx.id(), instance = %instance.id, cell = %instance.cell, "Guest deleted");
    Ok(ctx
        .reply_for(request, MessageKind::DeleteGuestResponse)
        .with(keys::INSTANCE, instance.id.0))
}

/// Handler for `StopInstanceRequest`
pub struct StopGuestWorkflow;

#[async_trait]
impl OperationHandler for StopGuestWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let outcome = stop(ctx, &request).await;
        ctx.finish(&request, MessageKind::StopInstanceResponse, outcome).await
    }
}

async fn stop(ctx: &mut SessionContext, request: &Envelope) -> Result<Envelope, OperationError> {
    let instance_id = instance_field(request, keys::INSTANCE)?;
    let instance = ctx.authority().get_instance_status(&instance_id).await?;
    if !instance.running {
        return Err(invalid_state("instance already stopped"));
    }

    let forward = ctx
        .request(MessageKind::StopInstanceRequest)
        .with(keys::INSTANCE, instance.id.0.clone());
    ctx.forward_and_wait(
        forward,
        &Destination::cell(&instance.cell),
        MessageKind::StopInstanceResponse,
    )
    .await?;

    ctx.authority().set_instance_running(&instance.id, false).await?;
    info!(session = %ctx.id(), instance = %instance.id, "Guest stopped");
    Ok(ctx
        .reply_for(request, MessageKind::StopInstanceResponse)
        .with(keys::INSTANCE, instance.id.0))
}
