//! Disk image creation from a stopped guest.
//!
//! The image record on the image server is the commit point. If the cell then
//! fails to upload the system volume, the record is deleted again.

use async_trait::async_trait;
use tracing::info;

use super::{instance_field, invalid_state};
use crate::application::compensation::{CompensationLog, UndoAction};
use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::address::{validate_name, Destination};
use crate::domain::envelope::{keys, Envelope, MessageKind};
use crate::error::{CoreError, OperationError};

/// Handler for `CreateDiskImageRequest`
pub struct CreateDiskImageWorkflow;

#[async_trait]
impl OperationHandler for CreateDiskImageWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let outcome = run(ctx, &request).await;
        ctx.finish(&request, MessageKind::CreateDiskImageResponse, outcome).await
    }
}

async fn run(ctx: &mut SessionContext, request: &Envelope) -> Result<Envelope, OperationError> {
    let name = request.string(keys::NAME)?.to_string();
    validate_name("image", &name)?;
    let instance_id = instance_field(request, keys::INSTANCE)?;
    let description = request.optional_string(keys::DESCRIPTION)?.unwrap_or_default().to_string();

    let instance = ctx.authority().get_instance_status(&instance_id).await?;
    if instance.running {
        return Err(invalid_state(format!("instance {} is running", instance.id)));
    }
    let system_disk = instance.disks.first().copied().unwrap_or_default();
    let server = ctx.authority().get_image_server().await?;

    let create = ctx
        .request(MessageKind::CreateDiskImageRequest)
        .with(keys::NAME, name.clone())
        .with(keys::DESCRIPTION, description)
        .with(keys::SIZE, system_disk)
        .with(keys::INSTANCE, instance.id.0.clone());
    let created = ctx
        .forward_and_wait(
            create,
            &Destination::Node(server.clone()),
            MessageKind::CreateDiskImageResponse,
        )
        .await?;
    let image = created.string(keys::IMAGE).map_err(|e| {
        OperationError::Remote(format!("image server reply: {}", e))
    })?;
    let image = image.to_string();

    let mut log = CompensationLog::new();
    log.commit(UndoAction::DeleteDiskImage {
        server: server.clone(),
        image: image.clone(),
    });

    let upload = ctx
        .request(MessageKind::UploadDiskImageRequest)
        .with(keys::IMAGE, image.clone())
        .with(keys::IMAGE_SERVER, server.clone())
        .with(keys::INSTANCE, instance.id.0.clone());
    if let Err(e) = ctx
        .forward_and_wait(
            upload,
            &Destination::cell(&instance.cell),
            MessageKind::UploadDiskImageResponse,
        )
        .await
    {
        let err = OperationError::from(e);
        log.unwind(ctx, &format!("upload disk image fail: {}", err)).await;
        return Err(err);
    }

    info!(
        session = %ctx.id(),
        image = %image,
        server = %server,
        instance = %instance.id,
        "Disk image created"
    );
    Ok(ctx
        .reply_for(request, MessageKind::CreateDiskImageResponse)
        .with(keys::IMAGE, image)
        .with(keys::IMAGE_SERVER, server))
}
