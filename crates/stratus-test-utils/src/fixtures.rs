//! Seeded records and request builders shared by tests.

use stratus_core::domain::records::{
    DiskImage, GuestConfig, InstanceId, InstanceStatus, SecurityPolicyGroup, SystemTemplate,
};
use stratus_core::{keys, CellName, Envelope, MessageKind, OrchestratorConfig};
use stratus_state_inmemory::InMemoryResourceAuthority;

/// Name the test caller signs its requests with
pub const CALLER: &str = "admin";

/// Pool every fixture lives in
pub const POOL: &str = "default";

/// Template id seeded by [`seeded_authority`]
pub const TEMPLATE: &str = "tpl-linux";

/// Image id seeded by [`seeded_authority`]
pub const IMAGE: &str = "img-base";

/// Image server seeded by [`seeded_authority`]
pub const IMAGE_SERVER: &str = "images-1";

/// Storage path every seeded cell starts with
pub const STORAGE_PATH: &str = "/var/lib/stratus";

/// Cell `default.<name>`
pub fn cell(name: &str) -> CellName {
    CellName::new(POOL, name)
}

/// Template record
pub fn template(id: &str) -> SystemTemplate {
    SystemTemplate {
        id: id.to_string(),
        name: format!("{} template", id),
        operating_system: "linux".to_string(),
    }
}

/// Stopped instance record
pub fn instance(id: &str, name: &str, cell: CellName) -> InstanceStatus {
    InstanceStatus {
        id: InstanceId(id.to_string()),
        name: name.to_string(),
        cell,
        running: false,
        resetting: false,
        template: TEMPLATE.to_string(),
        disks: vec![20],
        monitor_secret: format!("secret-{}", id),
    }
}

/// Minimal guest config for the fixture pool
pub fn guest_config(name: &str) -> GuestConfig {
    GuestConfig {
        name: name.to_string(),
        owner: CALLER.to_string(),
        pool: POOL.to_string(),
        template: TEMPLATE.to_string(),
        security_policy: None,
        source_image: None,
        cores: 1,
        memory_mb: 1024,
        disks: vec![20],
        auto_start: false,
    }
}

/// Authority with cells `default.c1` and `default.c2`, the fixture template,
/// a security policy, an image and an image server
pub async fn seeded_authority() -> InMemoryResourceAuthority {
    let authority = InMemoryResourceAuthority::new();
    authority.add_cell(cell("c1"), STORAGE_PATH).await;
    authority.add_cell(cell("c2"), STORAGE_PATH).await;
    authority.add_template(template(TEMPLATE)).await;
    authority
        .add_security_policy(SecurityPolicyGroup {
            id: "sp-default".to_string(),
            name: "default".to_string(),
            accept_by_default: true,
        })
        .await;
    authority
        .add_disk_image(DiskImage {
            id: IMAGE.to_string(),
            name: "base".to_string(),
            server: IMAGE_SERVER.to_string(),
            size: 2 << 30,
        })
        .await;
    authority.set_image_server(IMAGE_SERVER).await;
    authority
}

/// Config with short waits, for tests running on paused time
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        operate_timeout_secs: 5,
        batch_stall_window_secs: 10,
        batch_check_interval_ms: 100,
        inbox_capacity: 16,
    }
}

/// `CreateGuestRequest` from the test caller
pub fn create_guest_request(name: &str) -> Envelope {
    Envelope::request(MessageKind::CreateGuestRequest, CALLER)
        .with(keys::NAME, name)
        .with(keys::TEMPLATE, TEMPLATE)
        .with(keys::DISKS, vec![20u64])
}

/// `MigrateInstanceRequest` from the test caller
pub fn migrate_request(source: &CellName, target: &CellName, instances: &[&str]) -> Envelope {
    Envelope::request(MessageKind::MigrateInstanceRequest, CALLER)
        .with(keys::SOURCE_CELL, source.to_string())
        .with(keys::TARGET_CELL, target.to_string())
        .with(
            keys::INSTANCES,
            instances.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
}

/// Batch request of `kind` over `items`
pub fn batch_request(kind: MessageKind, items: &[&str]) -> Envelope {
    Envelope::request(kind, CALLER).with(
        keys::ITEMS,
        items.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
    )
}
