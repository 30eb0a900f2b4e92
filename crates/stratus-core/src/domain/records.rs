//! Records owned by the resource authority, as seen by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::address::CellName;

/// Value object: Instance ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value object: Migration ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationId(pub String);

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value object: Batch job ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requested shape of a new guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestConfig {
    /// Guest name
    pub name: String,
    /// Owning user or group
    pub owner: String,
    /// Pool to place the guest in
    pub pool: String,
    /// System template id
    pub template: String,
    /// Security policy group id
    pub security_policy: Option<String>,
    /// Disk image to clone the system volume from
    pub source_image: Option<String>,
    /// CPU cores
    pub cores: u64,
    /// Memory in MiB
    pub memory_mb: u64,
    /// Volume sizes in GiB, system volume first
    pub disks: Vec<u64>,
    /// Start the guest once created
    pub auto_start: bool,
}

/// Authority view of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Instance id
    pub id: InstanceId,
    /// Guest name
    pub name: String,
    /// Cell hosting the instance
    pub cell: CellName,
    /// Whether the guest is running
    pub running: bool,
    /// Set while a system reset is in flight
    pub resetting: bool,
    /// System template id
    pub template: String,
    /// Volume sizes in GiB
    pub disks: Vec<u64>,
    /// Monitor secret handed to the cell at creation
    pub monitor_secret: String,
}

/// System template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTemplate {
    /// Template id
    pub id: String,
    /// Display name
    pub name: String,
    /// Operating system family
    pub operating_system: String,
}

/// Security policy group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicyGroup {
    /// Group id
    pub id: String,
    /// Display name
    pub name: String,
    /// Default action when no rule matches
    pub accept_by_default: bool,
}

/// Disk image known to the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskImage {
    /// Image id
    pub id: String,
    /// Image name
    pub name: String,
    /// Image server hosting the data
    pub server: String,
    /// Size in bytes
    pub size: u64,
}

/// Cell record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellStatus {
    /// Qualified cell name
    pub name: CellName,
    /// Whether the cell is connected
    pub alive: bool,
    /// Directory the cell keeps guest volumes under
    pub storage_path: String,
}

/// Migration lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationState {
    /// Steps are in flight
    InProgress,
    /// The target cell reported completion
    Finished,
    /// Rolled back with the given reason
    Cancelled(String),
}

/// Migration record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Record id
    pub id: MigrationId,
    /// Cell releasing the instances
    pub source: CellName,
    /// Cell taking over the instances
    pub target: CellName,
    /// Migrated instances
    pub instances: Vec<InstanceId>,
    /// Current state
    pub state: MigrationState,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Target cell -> instances to relocate there
pub type FailoverPlan = BTreeMap<CellName, Vec<InstanceId>>;

/// Kind of sub-operation a batch job fans out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchKind {
    /// One guest creation per item
    CreateGuest,
    /// One guest deletion per item
    DeleteGuest,
    /// One guest stop per item
    StopGuest,
}

/// Per-item batch state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchItemStatus {
    /// Dispatched, no outcome yet
    Pending,
    /// Reported in progress by the sub-operation
    Started,
    /// Finished successfully
    Succeeded,
    /// Finished with the given reason
    Failed(String),
}

impl BatchItemStatus {
    /// Whether no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchItemStatus::Succeeded | BatchItemStatus::Failed(_))
    }

    /// Wire label
    pub fn label(&self) -> &'static str {
        match self {
            BatchItemStatus::Pending => "pending",
            BatchItemStatus::Started => "started",
            BatchItemStatus::Succeeded => "success",
            BatchItemStatus::Failed(_) => "failed",
        }
    }
}

/// One batch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Guest name (create) or instance id (delete/stop)
    pub name: String,
    /// Current state
    pub status: BatchItemStatus,
}

/// Batch job record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Job id
    pub id: BatchId,
    /// Sub-operation kind
    pub kind: BatchKind,
    /// Items in dispatch order; the index is the transaction id
    pub items: Vec<BatchItem>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    /// Whether every item reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.items.iter().all(|item| item.status.is_terminal())
    }
}
