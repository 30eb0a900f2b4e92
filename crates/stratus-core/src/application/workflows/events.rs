//! Unsolicited cell events. Each runs in its own session and sends no reply.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{instance_field, instance_list};
use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::envelope::{keys, Envelope};
use crate::domain::records::MigrationId;
use crate::error::{CoreError, OperationError};

/// Finishes a migration once the target cell reports completion
pub struct InstanceMigratedEventHandler;

#[async_trait]
impl OperationHandler for InstanceMigratedEventHandler {
    async fn execute(&self, ctx: &mut SessionContext, event: Envelope) -> Result<(), CoreError> {
        if let Err(e) = finish_migration(ctx, &event).await {
            warn!(session = %ctx.id(), error = %e, "Finish migration failed");
        }
        Ok(())
    }
}

async fn finish_migration(
    ctx: &mut SessionContext,
    event: &Envelope,
) -> Result<(), OperationError> {
    let migration = MigrationId(event.string(keys::MIGRATION)?.to_string());
    let instances = instance_list(event, keys::INSTANCES)?;
    let ports = if event.has(keys::MONITOR_PORTS) {
        event.uints(keys::MONITOR_PORTS)?.to_vec()
    } else {
        Vec::new()
    };

    ctx.authority()
        .finish_migration(&migration, instances, ports)
        .await?;
    info!(session = %ctx.id(), migration = %migration, "Migration finished");
    Ok(())
}

/// Tracks guest power state reported by cells
pub struct GuestRunningEventHandler {
    running: bool,
}

impl GuestRunningEventHandler {
    /// Handler for `GuestStartedEvent`
    pub fn started() -> Self {
        Self { running: true }
    }

    /// Handler for `GuestStoppedEvent`
    pub fn stopped() -> Self {
        Self { running: false }
    }
}

#[async_trait]
impl OperationHandler for GuestRunningEventHandler {
    async fn execute(&self, ctx: &mut SessionContext, event: Envelope) -> Result<(), CoreError> {
        let instance = match instance_field(&event, keys::INSTANCE) {
            Ok(instance) => instance,
            Err(e) => {
                warn!(
                    session = %ctx.id(),
                    kind = %event.kind,
                    error = %e,
                    "Ignoring malformed event"
                );
                return Ok(());
            }
        };
        if let Err(e) = ctx.authority().set_instance_running(&instance, self.running).await {
            warn!(
                session = %ctx.id(),
                instance = %instance,
                running = self.running,
                error = %e,
                "Update instance running state failed"
            );
        }
        Ok(())
    }
}
