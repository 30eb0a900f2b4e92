//! Resource authority interface
//!
//! The authority is the single writer of cluster state. Every call is a typed
//! request answered exactly once; implementations serialise conflicting
//! mutations so that concurrent sessions never observe torn records.

use async_trait::async_trait;

use super::address::CellName;
use super::records::{
    BatchId, BatchItemStatus, BatchJob, BatchKind, CellStatus, DiskImage, FailoverPlan,
    GuestConfig, InstanceId, InstanceStatus, MigrationId, SecurityPolicyGroup, SystemTemplate,
};
use crate::error::AuthorityError;

/// Resource authority consumed by the orchestration workflows
#[async_trait]
pub trait ResourceAuthority: Send + Sync {
    /// Look up a system template
    async fn get_system_template(&self, id: &str) -> Result<SystemTemplate, AuthorityError>;

    /// Look up a security policy group
    async fn get_security_policy_group(&self, id: &str)
        -> Result<SecurityPolicyGroup, AuthorityError>;

    /// Look up a disk image
    async fn get_disk_image(&self, id: &str) -> Result<DiskImage, AuthorityError>;

    /// Name of the image server new images are placed on
    async fn get_image_server(&self) -> Result<String, AuthorityError>;

    /// Reserve an instance record and assign it a cell
    async fn allocate_instance(
        &self,
        config: GuestConfig,
    ) -> Result<InstanceStatus, AuthorityError>;

    /// Release an instance record
    async fn deallocate_instance(&self, id: &InstanceId) -> Result<(), AuthorityError>;

    /// Read an instance record
    async fn get_instance_status(&self, id: &InstanceId) -> Result<InstanceStatus, AuthorityError>;

    /// Update the running flag of an instance
    async fn set_instance_running(&self, id: &InstanceId, running: bool)
        -> Result<(), AuthorityError>;

    /// Flag an instance as being reset
    async fn begin_reset(&self, id: &InstanceId) -> Result<(), AuthorityError>;

    /// Clear the reset flag of an instance
    async fn finish_reset(&self, id: &InstanceId) -> Result<(), AuthorityError>;

    /// Read a cell record
    async fn get_cell_status(&self, cell: &CellName) -> Result<CellStatus, AuthorityError>;

    /// Record a new storage path for a cell
    async fn update_cell_storage_path(&self, cell: &CellName, path: &str)
        -> Result<(), AuthorityError>;

    /// Open a migration record
    async fn create_migration(
        &self,
        source: &CellName,
        target: &CellName,
        instances: Vec<InstanceId>,
    ) -> Result<MigrationId, AuthorityError>;

    /// Roll back a migration record
    async fn cancel_migration(&self, id: &MigrationId, reason: &str) -> Result<(), AuthorityError>;

    /// Close a migration record once the target reported completion
    async fn finish_migration(
        &self,
        id: &MigrationId,
        instances: Vec<InstanceId>,
        monitor_ports: Vec<u64>,
    ) -> Result<(), AuthorityError>;

    /// Decide where the instances of an unreachable cell go
    async fn build_failover_plan(&self, cell: &CellName) -> Result<FailoverPlan, AuthorityError>;

    /// Create a batch job with one pending item per entry
    async fn create_batch_job(&self, kind: BatchKind, items: Vec<String>)
        -> Result<BatchId, AuthorityError>;

    /// Transition one batch item
    async fn update_batch_item(
        &self,
        id: &BatchId,
        index: usize,
        status: BatchItemStatus,
    ) -> Result<(), AuthorityError>;

    /// Read a batch job
    async fn get_batch_job(&self, id: &BatchId) -> Result<BatchJob, AuthorityError>;
}
