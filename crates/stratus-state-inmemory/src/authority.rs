use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stratus_core::domain::address::CellName;
use stratus_core::domain::authority::ResourceAuthority;
use stratus_core::domain::records::{
    BatchId, BatchItem, BatchItemStatus, BatchJob, BatchKind, CellStatus, DiskImage, FailoverPlan,
    GuestConfig, InstanceId, InstanceStatus, MigrationId, MigrationRecord, MigrationState,
    SecurityPolicyGroup, SystemTemplate,
};
use stratus_core::AuthorityError;

#[derive(Default)]
struct AuthorityState {
    templates: HashMap<String, SystemTemplate>,
    policies: HashMap<String, SecurityPolicyGroup>,
    images: HashMap<String, DiskImage>,
    image_server: Option<String>,
    cells: BTreeMap<CellName, CellStatus>,
    instances: HashMap<InstanceId, InstanceStatus>,
    migrations: HashMap<MigrationId, MigrationRecord>,
    batches: HashMap<BatchId, BatchJob>,
}

impl AuthorityState {
    fn instance_mut(&mut self, id: &InstanceId) -> Result<&mut InstanceStatus, AuthorityError> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| AuthorityError::NotFound(format!("instance {}", id)))
    }

    fn load_of(&self, cell: &CellName) -> usize {
        self.instances.values().filter(|i| &i.cell == cell).count()
    }

    /// Alive cells of `pool` except `excluded`, least loaded first
    fn candidates(&self, pool: &str, excluded: Option<&CellName>) -> Vec<(CellName, usize)> {
        let mut candidates: Vec<(CellName, usize)> = self
            .cells
            .values()
            .filter(|c| c.alive && c.name.pool == pool && Some(&c.name) != excluded)
            .map(|c| (c.name.clone(), self.load_of(&c.name)))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        candidates
    }

    fn migrating(&self, id: &InstanceId) -> bool {
        self.migrations
            .values()
            .any(|m| m.state == MigrationState::InProgress && m.instances.contains(id))
    }
}

/// In-memory resource authority.
///
/// All records live behind one lock, so every call is serialised the way a
/// single-writer authority would serialise it.
#[derive(Clone, Default)]
pub struct InMemoryResourceAuthority {
    state: Arc<RwLock<AuthorityState>>,
}

impl InMemoryResourceAuthority {
    /// Create an empty authority
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected cell
    pub async fn add_cell(&self, name: CellName, storage_path: impl Into<String>) {
        let status = CellStatus {
            name: name.clone(),
            alive: true,
            storage_path: storage_path.into(),
        };
        self.state.write().await.cells.insert(name, status);
    }

    /// Mark a cell connected or disconnected
    pub async fn set_cell_alive(&self, name: &CellName, alive: bool) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        let cell = state
            .cells
            .get_mut(name)
            .ok_or_else(|| AuthorityError::NotFound(format!("cell {}", name)))?;
        cell.alive = alive;
        Ok(())
    }

    /// Register a system template
    pub async fn add_template(&self, template: SystemTemplate) {
        self.state.write().await.templates.insert(template.id.clone(), template);
    }

    /// Register a security policy group
    pub async fn add_security_policy(&self, policy: SecurityPolicyGroup) {
        self.state.write().await.policies.insert(policy.id.clone(), policy);
    }

    /// Register a disk image
    pub async fn add_disk_image(&self, image: DiskImage) {
        self.state.write().await.images.insert(image.id.clone(), image);
    }

    /// Set the image server new images go to
    pub async fn set_image_server(&self, server: impl Into<String>) {
        self.state.write().await.image_server = Some(server.into());
    }

    /// Insert an instance record as is
    pub async fn add_instance(&self, instance: InstanceStatus) {
        self.state.write().await.instances.insert(instance.id.clone(), instance);
    }

    /// Snapshot of an instance record
    pub async fn instance(&self, id: &InstanceId) -> Option<InstanceStatus> {
        self.state.read().await.instances.get(id).cloned()
    }

    /// Number of instance records
    pub async fn instance_count(&self) -> usize {
        self.state.read().await.instances.len()
    }

    /// Snapshot of a migration record
    pub async fn migration(&self, id: &MigrationId) -> Option<MigrationRecord> {
        self.state.read().await.migrations.get(id).cloned()
    }

    /// Snapshot of every migration record
    pub async fn migrations(&self) -> Vec<MigrationRecord> {
        self.state.read().await.migrations.values().cloned().collect()
    }
}

#[async_trait]
impl ResourceAuthority for InMemoryResourceAuthority {
    async fn get_system_template(&self, id: &str) -> Result<SystemTemplate, AuthorityError> {
        self.state
            .read()
            .await
            .templates
            .get(id)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("system template {}", id)))
    }

    async fn get_security_policy_group(
        &self,
        id: &str,
    ) -> Result<SecurityPolicyGroup, AuthorityError> {
        self.state
            .read()
            .await
            .policies
            .get(id)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("security policy group {}", id)))
    }

    async fn get_disk_image(&self, id: &str) -> Result<DiskImage, AuthorityError> {
        self.state
            .read()
            .await
            .images
            .get(id)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("disk image {}", id)))
    }

    async fn get_image_server(&self) -> Result<String, AuthorityError> {
        self.state
            .read()
            .await
            .image_server
            .clone()
            .ok_or_else(|| AuthorityError::NotFound("image server".to_string()))
    }

    async fn allocate_instance(
        &self,
        config: GuestConfig,
    ) -> Result<InstanceStatus, AuthorityError> {
        let mut state = self.state.write().await;
        if state
            .instances
            .values()
            .any(|i| i.name == config.name && i.cell.pool == config.pool)
        {
            return Err(AuthorityError::AlreadyExists(format!("guest {}", config.name)));
        }

        let (cell, load) = state
            .candidates(&config.pool, None)
            .into_iter()
            .next()
            .ok_or_else(|| {
                AuthorityError::InvalidState(format!("no available cell in pool {}", config.pool))
            })?;

        let instance = InstanceStatus {
            id: InstanceId(Uuid::new_v4().to_string()),
            name: config.name,
            cell,
            running: false,
            resetting: false,
            template: config.template,
            disks: config.disks,
            monitor_secret: Uuid::new_v4().simple().to_string(),
        };
        debug!(instance = %instance.id, cell = %instance.cell, load, "Instance allocated");
        state.instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn deallocate_instance(&self, id: &InstanceId) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        state
            .instances
            .remove(id)
            .map(|_| debug!(instance = %id, "Instance deallocated"))
            .ok_or_else(|| AuthorityError::NotFound(format!("instance {}", id)))
    }

    async fn get_instance_status(&self, id: &InstanceId) -> Result<InstanceStatus, AuthorityError> {
        self.state
            .read()
            .await
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("instance {}", id)))
    }

    async fn set_instance_running(
        &self,
        id: &InstanceId,
        running: bool,
    ) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        state.instance_mut(id)?.running = running;
        Ok(())
    }

    async fn begin_reset(&self, id: &InstanceId) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        let instance = state.instance_mut(id)?;
        if instance.running {
            return Err(AuthorityError::InvalidState(format!("instance {} is running", id)));
        }
        if instance.resetting {
            return Err(AuthorityError::InvalidState(format!(
                "instance {} is already resetting",
                id
            )));
        }
        instance.resetting = true;
        Ok(())
    }

    async fn finish_reset(&self, id: &InstanceId) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        state.instance_mut(id)?.resetting = false;
        Ok(())
    }

    async fn get_cell_status(&self, cell: &CellName) -> Result<CellStatus, AuthorityError> {
        self.state
            .read()
            .await
            .cells
            .get(cell)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("cell {}", cell)))
    }

    async fn update_cell_storage_path(
        &self,
        cell: &CellName,
        path: &str,
    ) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        let status = state
            .cells
            .get_mut(cell)
            .ok_or_else(|| AuthorityError::NotFound(format!("cell {}", cell)))?;
        status.storage_path = path.to_string();
        Ok(())
    }

    async fn create_migration(
        &self,
        source: &CellName,
        target: &CellName,
        instances: Vec<InstanceId>,
    ) -> Result<MigrationId, AuthorityError> {
        let mut state = self.state.write().await;
        match state.cells.get(target) {
            Some(cell) if cell.alive => {}
            Some(_) => {
                return Err(AuthorityError::InvalidState(format!(
                    "cell {} is disconnected",
                    target
                )))
            }
            None => return Err(AuthorityError::NotFound(format!("cell {}", target))),
        }
        for id in &instances {
            let instance = state
                .instances
                .get(id)
                .ok_or_else(|| AuthorityError::NotFound(format!("instance {}", id)))?;
            if &instance.cell != source {
                return Err(AuthorityError::InvalidState(format!(
                    "instance {} is not on {}",
                    id, source
                )));
            }
            if state.migrating(id) {
                return Err(AuthorityError::InvalidState(format!(
                    "instance {} is already migrating",
                    id
                )));
            }
        }

        let record = MigrationRecord {
            id: MigrationId(Uuid::new_v4().to_string()),
            source: source.clone(),
            target: target.clone(),
            instances,
            state: MigrationState::InProgress,
            created_at: Utc::now(),
        };
        let id = record.id.clone();
        state.migrations.insert(id.clone(), record);
        Ok(id)
    }

    async fn cancel_migration(&self, id: &MigrationId, reason: &str) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        let record = state
            .migrations
            .get_mut(id)
            .ok_or_else(|| AuthorityError::NotFound(format!("migration {}", id)))?;
        if record.state != MigrationState::InProgress {
            return Err(AuthorityError::InvalidState(format!("migration {} already closed", id)));
        }
        record.state = MigrationState::Cancelled(reason.to_string());
        info!(migration = %id, reason, "Migration cancelled");
        Ok(())
    }

    async fn finish_migration(
        &self,
        id: &MigrationId,
        instances: Vec<InstanceId>,
        monitor_ports: Vec<u64>,
    ) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        let record = state
            .migrations
            .get(id)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("migration {}", id)))?;
        if record.state != MigrationState::InProgress {
            return Err(AuthorityError::InvalidState(format!("migration {} already closed", id)));
        }

        for instance in &instances {
            if !record.instances.contains(instance) {
                warn!(migration = %id, instance = %instance, "Instance not part of migration");
                continue;
            }
            if let Some(status) = state.instances.get_mut(instance) {
                status.cell = record.target.clone();
            }
        }
        if let Some(record) = state.migrations.get_mut(id) {
            record.state = MigrationState::Finished;
        }
        debug!(migration = %id, ports = monitor_ports.len(), "Migration finished");
        Ok(())
    }

    async fn build_failover_plan(&self, cell: &CellName) -> Result<FailoverPlan, AuthorityError> {
        let mut state = self.state.write().await;
        let failed = state
            .cells
            .get_mut(cell)
            .ok_or_else(|| AuthorityError::NotFound(format!("cell {}", cell)))?;
        failed.alive = false;

        let mut stranded: Vec<InstanceId> = state
            .instances
            .values()
            .filter(|i| &i.cell == cell)
            .map(|i| i.id.clone())
            .collect();
        stranded.sort();
        if stranded.is_empty() {
            return Ok(FailoverPlan::new());
        }

        let mut targets = state.candidates(&cell.pool, Some(cell));
        if targets.is_empty() {
            return Err(AuthorityError::InvalidState(format!(
                "no available cell in pool {}",
                cell.pool
            )));
        }

        let mut plan = FailoverPlan::new();
        for id in stranded {
            targets.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let target = &mut targets[0];
            target.1 += 1;
            plan.entry(target.0.clone()).or_insert_with(Vec::new).push(id);
        }
        Ok(plan)
    }

    async fn create_batch_job(
        &self,
        kind: BatchKind,
        items: Vec<String>,
    ) -> Result<BatchId, AuthorityError> {
        let job = BatchJob {
            id: BatchId(Uuid::new_v4().to_string()),
            kind,
            items: items
                .into_iter()
                .map(|name| BatchItem {
                    name,
                    status: BatchItemStatus::Pending,
                })
                .collect(),
            created_at: Utc::now(),
        };
        let id = job.id.clone();
        self.state.write().await.batches.insert(id.clone(), job);
        Ok(id)
    }

    async fn update_batch_item(
        &self,
        id: &BatchId,
        index: usize,
        status: BatchItemStatus,
    ) -> Result<(), AuthorityError> {
        let mut state = self.state.write().await;
        let job = state
            .batches
            .get_mut(id)
            .ok_or_else(|| AuthorityError::NotFound(format!("batch {}", id)))?;
        let item = job
            .items
            .get_mut(index)
            .ok_or_else(|| AuthorityError::NotFound(format!("batch {} item {}", id, index)))?;
        if item.status.is_terminal() {
            return Err(AuthorityError::InvalidState(format!(
                "batch {} item {} already {}",
                id,
                index,
                item.status.label()
            )));
        }
        item.status = status;
        Ok(())
    }

    async fn get_batch_job(&self, id: &BatchId) -> Result<BatchJob, AuthorityError> {
        self.state
            .read()
            .await
            .batches
            .get(id)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("batch {}", id)))
    }
}
