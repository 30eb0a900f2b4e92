//! System reset of a stopped guest from a disk image.
//!
//! `begin_reset` marks the guest as resetting and has no undo: when the cell
//! fails, the flag stays set and the failure is logged for an operator.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{instance_field, invalid_state};
use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::address::Destination;
use crate::domain::envelope::{keys, Envelope, MessageKind};
use crate::error::{CoreError, OperationError};

/// Handler for `ResetSystemRequest`
pub struct ResetSystemWorkflow;

#[async_trait]
impl OperationHandler for ResetSystemWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let outcome = run(ctx, &request).await;
        ctx.finish(&request, MessageKind::ResetSystemResponse, outcome).await
    }
}

async fn run(ctx: &mut SessionContext, request: &Envelope) -> Result<Envelope, OperationError> {
    let instance_id = instance_field(request, keys::INSTANCE)?;
    let image_id = request.string(keys::IMAGE)?.to_string();

    let instance = ctx.authority().get_instance_status(&instance_id).await?;
    if instance.running {
        return Err(invalid_state(format!("instance {} is running", instance.id)));
    }
    if instance.resetting {
        return Err(invalid_state(format!("instance {} is already resetting", instance.id)));
    }
    let image = ctx.authority().get_disk_image(&image_id).await?;

    ctx.authority().begin_reset(&instance.id).await?;

    let forward = ctx
        .request(MessageKind::ResetSystemRequest)
        .with(keys::INSTANCE, instance.id.0.clone())
        .with(keys::IMAGE, image.id.clone())
        .with(keys::IMAGE_SERVER, image.server.clone())
        .with(keys::SIZE, image.size);
    if let Err(e) = ctx
        .forward_and_wait(
            forward,
            &Destination::cell(&instance.cell),
            MessageKind::ResetSystemResponse,
        )
        .await
    {
        let err = OperationError::from(e);
        warn!(
            session = %ctx.id(),
            instance = %instance.id,
            error = %err,
            "Reset system failed, resetting flag left set"
        );
        return Err(err);
    }

    ctx.authority().finish_reset(&instance.id).await?;
    info!(session = %ctx.id(), instance = %instance.id, image = %image.id, "System reset");
    Ok(ctx
        .reply_for(request, MessageKind::ResetSystemResponse)
        .with(keys::INSTANCE, instance.id.0))
}
