//! Guest creation: the canonical compensating workflow.
//!
//! Identifiers are validated and auxiliary records resolved before anything is
//! committed. `allocate_instance` is the commit point; once it succeeds, every
//! failure path deallocates the instance before the failure reply goes out.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::application::compensation::{CompensationLog, UndoAction};
use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::address::{validate_name, Destination};
use crate::domain::envelope::{keys, Envelope, MessageKind};
use crate::domain::records::GuestConfig;
use crate::error::{CoreError, OperationError};

/// Pool used when the request does not name one
pub const DEFAULT_POOL: &str = "default";

const DEFAULT_CORES: u64 = 1;
const DEFAULT_MEMORY_MB: u64 = 1024;

/// Handler for `CreateGuestRequest`
pub struct CreateGuestWorkflow;

#[async_trait]
impl OperationHandler for CreateGuestWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let outcome = run(ctx, &request).await;
        ctx.finish(&request, MessageKind::CreateGuestResponse, outcome).await
    }
}

/// Build a guest config from request fields
pub(crate) fn parse_config(request: &Envelope) -> Result<GuestConfig, OperationError> {
    let name = request.string(keys::NAME)?.to_string();
    validate_name("guest", &name)?;

    let template = request.string(keys::TEMPLATE)?.to_string();
    if template.is_empty() {
        return Err(OperationError::Malformed("empty field 'template'".to_string()));
    }

    let disks = request.uints(keys::DISKS)?.to_vec();
    if disks.is_empty() {
        return Err(OperationError::Malformed("at least one disk required".to_string()));
    }

    let cores = request.optional_uint(keys::CORES, DEFAULT_CORES)?;
    let memory_mb = request.optional_uint(keys::MEMORY, DEFAULT_MEMORY_MB)?;
    if cores == 0 || memory_mb == 0 {
        return Err(OperationError::Malformed("cores and memory must be positive".to_string()));
    }

    Ok(GuestConfig {
        name,
        owner: request.optional_string(keys::OWNER)?.unwrap_or_default().to_string(),
        pool: request
            .optional_string(keys::POOL)?
            .unwrap_or(DEFAULT_POOL)
            .to_string(),
        template,
        security_policy: request.optional_string(keys::SECURITY_POLICY)?.map(str::to_string),
        source_image: request.optional_string(keys::IMAGE)?.map(str::to_string),
        cores,
        memory_mb,
        disks,
        auto_start: request.optional_bool(keys::AUTO_START, false)?,
    })
}

async fn run(ctx: &mut SessionContext, request: &Envelope) -> Result<Envelope, OperationError> {
    let config = parse_config(request)?;

    let template = ctx.authority().get_system_template(&config.template).await?;
    if let Some(policy) = &config.security_policy {
        ctx.authority().get_security_policy_group(policy).await?;
    }
    let image = match &config.source_image {
        Some(image) => Some(ctx.authority().get_disk_image(image).await?),
        None => None,
    };

    let instance = ctx.authority().allocate_instance(config.clone()).await?;
    let mut log = CompensationLog::new();
    log.commit(UndoAction::DeallocateInstance(instance.id.clone()));
    debug!(
        session = %ctx.id(),
        instance = %instance.id,
        cell = %instance.cell,
        "Instance allocated"
    );

    let mut forward = ctx
        .request(MessageKind::CreateGuestRequest)
        .with(keys::INSTANCE, instance.id.0.clone())
        .with(keys::NAME, config.name.clone())
        .with(keys::TEMPLATE, template.id.clone())
        .with(keys::OPERATING_SYSTEM, template.operating_system.clone())
        .with(keys::CORES, config.cores)
        .with(keys::MEMORY, config.memory_mb)
        .with(keys::DISKS, config.disks.clone())
        .with(keys::AUTO_START, config.auto_start)
        .with(keys::MONITOR_SECRET, instance.monitor_secret.clone());
    if let Some(image) = &image {
        forward = forward
            .with(keys::IMAGE, image.id.clone())
            .with(keys::IMAGE_SERVER, image.server.clone());
    }
    if let Some(policy) = &config.security_policy {
        forward = forward.with(keys::SECURITY_POLICY, policy.clone());
    }

    let destination = Destination::cell(&instance.cell);
    match ctx
        .forward_and_wait(forward, &destination, MessageKind::CreateGuestResponse)
        .await
    {
        Ok(_) => {
            info!(
                session = %ctx.id(),
                instance = %instance.id,
                name = %config.name,
                cell = %instance.cell,
                "Guest created"
            );
            Ok(ctx
                .reply_for(request, MessageKind::CreateGuestResponse)
                .with(keys::INSTANCE, instance.id.0)
                .with(keys::CELL, instance.cell.to_string()))
        }
        Err(e) => {
            let err = OperationError::from(e);
            log.unwind(ctx, &format!("create guest fail: {}", err)).await;
            Err(err)
        }
    }
}
