//! Test doubles for unit tests inside this crate.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::address::{CellName, Destination};
use crate::domain::authority::ResourceAuthority;
use crate::domain::envelope::Envelope;
use crate::domain::records::{
    BatchId, BatchItemStatus, BatchJob, BatchKind, CellStatus, DiskImage, FailoverPlan,
    GuestConfig, InstanceId, InstanceStatus, MigrationId, SecurityPolicyGroup, SystemTemplate,
};
use crate::domain::transport::Transport;
use crate::error::{AuthorityError, TransportError};

/// Records every send and never replies
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(Destination, Envelope)>>,
}

impl RecordingTransport {
    pub async fn sent(&self) -> Vec<(Destination, Envelope)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        envelope: Envelope,
        destination: &Destination,
    ) -> Result<(), TransportError> {
        self.sent.lock().await.push((destination.clone(), envelope));
        Ok(())
    }
}

/// Authority that refuses every call
pub struct UnreachableAuthority;

fn unreachable<T>() -> Result<T, AuthorityError> {
    Err(AuthorityError::Other("authority unreachable".to_string()))
}

#[async_trait]
impl ResourceAuthority for UnreachableAuthority {
    async fn get_system_template(&self, _id: &str) -> Result<SystemTemplate, AuthorityError> {
        unreachable()
    }

    async fn get_security_policy_group(
        &self,
        _id: &str,
    ) -> Result<SecurityPolicyGroup, AuthorityError> {
        unreachable()
    }

    async fn get_disk_image(&self, _id: &str) -> Result<DiskImage, AuthorityError> {
        unreachable()
    }

    async fn get_image_server(&self) -> Result<String, AuthorityError> {
        unreachable()
    }

    async fn allocate_instance(
        &self,
        _config: GuestConfig,
    ) -> Result<InstanceStatus, AuthorityError> {
        unreachable()
    }

    async fn deallocate_instance(&self, _id: &InstanceId) -> Result<(), AuthorityError> {
        unreachable()
    }

    async fn get_instance_status(
        &self,
        _id: &InstanceId,
    ) -> Result<InstanceStatus, AuthorityError> {
        unreachable()
    }

    async fn set_instance_running(
        &self,
        _id: &InstanceId,
        _running: bool,
    ) -> Result<(), AuthorityError> {
        unreachable()
    }

    async fn begin_reset(&self, _id: &InstanceId) -> Result<(), AuthorityError> {
        unreachable()
    }

    async fn finish_reset(&self, _id: &InstanceId) -> Result<(), AuthorityError> {
        unreachable()
    }

    async fn get_cell_status(&self, _cell: &CellName) -> Result<CellStatus, AuthorityError> {
        unreachable()
    }

    async fn update_cell_storage_path(
        &self,
        _cell: &CellName,
        _path: &str,
    ) -> Result<(), AuthorityError> {
        unreachable()
    }

    async fn create_migration(
        &self,
        _source: &CellName,
        _target: &CellName,
        _instances: Vec<InstanceId>,
    ) -> Result<MigrationId, AuthorityError> {
        unreachable()
    }

    async fn cancel_migration(
        &self,
        _id: &MigrationId,
        _reason: &str,
    ) -> Result<(), AuthorityError> {
        unreachable()
    }

    async fn finish_migration(
        &self,
        _id: &MigrationId,
        _instances: Vec<InstanceId>,
        _monitor_ports: Vec<u64>,
    ) -> Result<(), AuthorityError> {
        unreachable()
    }

    async fn build_failover_plan(&self, _cell: &CellName) -> Result<FailoverPlan, AuthorityError> {
        unreachable()
    }

    async fn create_batch_job(
        &self,
        _kind: BatchKind,
        _items: Vec<String>,
    ) -> Result<BatchId, AuthorityError> {
        unreachable()
    }

    async fn update_batch_item(
        &self,
        _id: &BatchId,
        _index: usize,
        _status: BatchItemStatus,
    ) -> Result<(), AuthorityError> {
        unreachable()
    }

    async fn get_batch_job(&self, _id: &BatchId) -> Result<BatchJob, AuthorityError> {
        unreachable()
    }
}
