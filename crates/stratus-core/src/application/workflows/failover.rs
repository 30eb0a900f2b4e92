//! Failover after a cell disconnects ungracefully.
//!
//! The authority builds the plan; every target cell gets one immediate attach
//! request. Sends are fire-and-forget and failures are only logged: the source
//! is already unreachable, so there is nothing to cancel.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::address::{CellName, Destination};
use crate::domain::envelope::{keys, Envelope, MessageKind};
use crate::error::CoreError;

/// Handler for `CellDisconnectedEvent`
pub struct FailoverHandler;

#[async_trait]
impl OperationHandler for FailoverHandler {
    async fn execute(&self, ctx: &mut SessionContext, event: Envelope) -> Result<(), CoreError> {
        let cell = match event.string(keys::CELL).map_err(|e| e.to_string()).and_then(|name| {
            CellName::parse(name).map_err(|e| e.to_string())
        }) {
            Ok(cell) => cell,
            Err(e) => {
                warn!(session = %ctx.id(), error = %e, "Ignoring malformed disconnect event");
                return Ok(());
            }
        };

        if event.optional_bool(keys::GRACEFUL, false).unwrap_or(false) {
            info!(session = %ctx.id(), cell = %cell, "Cell disconnected gracefully, no failover");
            return Ok(());
        }

        let plan = match ctx.authority().build_failover_plan(&cell).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(session = %ctx.id(), cell = %cell, error = %e, "Build failover plan failed");
                return Ok(());
            }
        };
        if plan.is_empty() {
            info!(session = %ctx.id(), cell = %cell, "Nothing to fail over");
            return Ok(());
        }

        for (target, instances) in plan {
            let count = instances.len();
            let attach = ctx
                .request(MessageKind::AttachInstanceRequest)
                .with(
                    keys::INSTANCES,
                    instances.into_iter().map(|id| id.0).collect::<Vec<_>>(),
                )
                .with(keys::IMMEDIATE, true)
                .with(keys::SOURCE_CELL, cell.to_string());
            match ctx.send(attach, &Destination::cell(&target)).await {
                Ok(()) => info!(
                    session = %ctx.id(),
                    source = %cell,
                    target = %target,
                    instances = count,
                    "Failover attach sent"
                ),
                Err(e) => warn!(
                    session = %ctx.id(),
                    source = %cell,
                    target = %target,
                    error = %e,
                    "Failover attach send failed"
                ),
            }
        }
        Ok(())
    }
}
