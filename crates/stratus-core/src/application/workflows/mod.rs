//! Concrete orchestration routines.
//!
//! Each workflow is an [`OperationHandler`] bound to one inbound kind. The
//! request/response workflows follow the same shape: a private `run` function
//! computes the outcome, then `SessionContext::finish` sends the single reply.

use std::sync::Arc;

use super::orchestrator::{OperationHandler, OrchestratorBuilder};
use crate::domain::envelope::{Envelope, MessageKind};
use crate::domain::records::InstanceId;
use crate::error::{AuthorityError, OperationError};

/// Guest creation
pub mod create_guest;

/// Disk image creation
pub mod create_disk_image;

/// System reset
pub mod reset_system;

/// Cell storage path change
pub mod change_storage_path;

/// Guest deletion and stop
pub mod guest_lifecycle;

/// Instance migration
pub mod migration;

/// Failover after an ungraceful cell disconnect
pub mod failover;

/// Fan-out/fan-in batch jobs
pub mod batch;

/// Asynchronous cell events
pub mod events;

pub use batch::{AggregationOutcome, BatchAggregator, BatchWorkflow, QueryBatchStatusWorkflow};
pub use change_storage_path::ChangeStoragePathWorkflow;
pub use create_disk_image::CreateDiskImageWorkflow;
pub use create_guest::CreateGuestWorkflow;
pub use events::{GuestRunningEventHandler, InstanceMigratedEventHandler};
pub use failover::FailoverHandler;
pub use guest_lifecycle::{DeleteGuestWorkflow, StopGuestWorkflow};
pub use migration::MigrationWorkflow;
pub use reset_system::ResetSystemWorkflow;

impl OrchestratorBuilder {
    /// Register every standard workflow and event handler
    pub fn with_standard_workflows(self) -> Self {
        let handlers: Vec<(MessageKind, Arc<dyn OperationHandler>)> = vec![
            (MessageKind::CreateGuestRequest, Arc::new(CreateGuestWorkflow)),
            (MessageKind::DeleteGuestRequest, Arc::new(DeleteGuestWorkflow)),
            (MessageKind::StopInstanceRequest, Arc::new(StopGuestWorkflow)),
            (MessageKind::CreateDiskImageRequest, Arc::new(CreateDiskImageWorkflow)),
            (MessageKind::ResetSystemRequest, Arc::new(ResetSystemWorkflow)),
            (MessageKind::ModifyStoragePathRequest, Arc::new(ChangeStoragePathWorkflow)),
            (MessageKind::MigrateInstanceRequest, Arc::new(MigrationWorkflow)),
            (MessageKind::BatchCreateGuestRequest, Arc::new(BatchWorkflow::create_guests())),
            (MessageKind::BatchDeleteGuestRequest, Arc::new(BatchWorkflow::delete_guests())),
            (MessageKind::BatchStopGuestRequest, Arc::new(BatchWorkflow::stop_guests())),
            (MessageKind::QueryBatchStatusRequest, Arc::new(QueryBatchStatusWorkflow)),
            (MessageKind::InstanceMigratedEvent, Arc::new(InstanceMigratedEventHandler)),
            (MessageKind::CellDisconnectedEvent, Arc::new(FailoverHandler)),
            (MessageKind::GuestStartedEvent, Arc::new(GuestRunningEventHandler::started())),
            (MessageKind::GuestStoppedEvent, Arc::new(GuestRunningEventHandler::stopped())),
        ];

        handlers
            .into_iter()
            .fold(self, |builder, (kind, handler)| builder.register(kind, handler))
    }
}

/// Read a required instance id field
pub(crate) fn instance_field(request: &Envelope, key: &str) -> Result<InstanceId, OperationError> {
    let id = request.string(key)?;
    if id.is_empty() {
        return Err(OperationError::Malformed(format!("empty field '{}'", key)));
    }
    Ok(InstanceId(id.to_string()))
}

/// Read a required, non-empty instance id list
pub(crate) fn instance_list(
    request: &Envelope,
    key: &str,
) -> Result<Vec<InstanceId>, OperationError> {
    let ids = request.strings(key)?;
    if ids.is_empty() {
        return Err(OperationError::Malformed(format!("empty field '{}'", key)));
    }
    Ok(ids.iter().cloned().map(InstanceId).collect())
}

/// Authority-side precondition failure
pub(crate) fn invalid_state(message: impl Into<String>) -> OperationError {
    OperationError::Authority(AuthorityError::InvalidState(message.into()))
}
