//! Mock implementations of the interfaces the orchestrator consumes.

use async_trait::async_trait;
use mockall::mock;

use stratus_core::domain::records::{
    BatchId, BatchItemStatus, BatchJob, BatchKind, CellStatus, DiskImage, FailoverPlan,
    GuestConfig, InstanceId, InstanceStatus, MigrationId, SecurityPolicyGroup, SystemTemplate,
};
use stratus_core::{AuthorityError, CellName, ResourceAuthority};

// Generate the mock implementation
mock! {
    pub ResourceAuthority {}

    #[async_trait]
    impl ResourceAuthority for ResourceAuthority {
        async fn get_system_template(&self, id: &str) -> Result<SystemTemplate, AuthorityError>;
        async fn get_security_policy_group(
            &self,
            id: &str,
        ) -> Result<SecurityPolicyGroup, AuthorityError>;
        async fn get_disk_image(&self, id: &str) -> Result<DiskImage, AuthorityError>;
        async fn get_image_server(&self) -> Result<String, AuthorityError>;
        async fn allocate_instance(
            &self,
            config: GuestConfig,
        ) -> Result<InstanceStatus, AuthorityError>;
        async fn deallocate_instance(&self, id: &InstanceId) -> Result<(), AuthorityError>;
        async fn get_instance_status(
            &self,
            id: &InstanceId,
        ) -> Result<InstanceStatus, AuthorityError>;
        async fn set_instance_running(
            &self,
            id: &InstanceId,
            running: bool,
        ) -> Result<(), AuthorityError>;
        async fn begin_reset(&self, id: &InstanceId) -> Result<(), AuthorityError>;
        async fn finish_reset(&self, id: &InstanceId) -> Result<(), AuthorityError>;
        async fn get_cell_status(&self, cell: &CellName) -> Result<CellStatus, AuthorityError>;
        async fn update_cell_storage_path(
            &self,
            cell: &CellName,
            path: &str,
        ) -> Result<(), AuthorityError>;
        async fn create_migration(
            &self,
            source: &CellName,
            target: &CellName,
            instances: Vec<InstanceId>,
        ) -> Result<MigrationId, AuthorityError>;
        async fn cancel_migration(
            &self,
            id: &MigrationId,
            reason: &str,
        ) -> Result<(), AuthorityError>;
        async fn finish_migration(
            &self,
            id: &MigrationId,
            instances: Vec<InstanceId>,
            monitor_ports: Vec<u64>,
        ) -> Result<(), AuthorityError>;
        async fn build_failover_plan(
            &self,
            cell: &CellName,
        ) -> Result<FailoverPlan, AuthorityError>;
        async fn create_batch_job(
            &self,
            kind: BatchKind,
            items: Vec<String>,
        ) -> Result<BatchId, AuthorityError>;
        async fn update_batch_item(
            &self,
            id: &BatchId,
            index: usize,
            status: BatchItemStatus,
        ) -> Result<(), AuthorityError>;
        async fn get_batch_job(&self, id: &BatchId) -> Result<BatchJob, AuthorityError>;
    }
}

/// Creates a mock authority that resolves the fixture template and allocates
/// every guest as `i-1` on `default.c1`.
pub fn create_mock_authority() -> MockResourceAuthority {
    let mut mock = MockResourceAuthority::new();

    mock.expect_get_system_template()
        .returning(|id| Ok(crate::fixtures::template(id)));

    mock.expect_allocate_instance()
        .returning(|config| {
            Ok(crate::fixtures::instance(
                "i-1",
                &config.name,
                crate::fixtures::cell("c1"),
            ))
        });

    mock
}
