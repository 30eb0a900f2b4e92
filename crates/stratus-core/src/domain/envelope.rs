//! Wire envelope exchanged between the orchestrator, cells and image servers.
//!
//! An envelope is plain data. Once it is moved into a [`Transport`] it is never
//! touched again, so every mutation happens through the builder methods before
//! sending.
//!
//! [`Transport`]: crate::domain::transport::Transport

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Value object: Session ID
///
/// `SessionId(0)` is the unbound session: an envelope addressed to it opens a
/// new session instead of being delivered to an existing inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// The unbound session
    pub const UNBOUND: SessionId = SessionId(0);

    /// Whether this id refers to a live session rather than the intake
    pub fn is_bound(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value object: Transaction ID, the sub-correlation key inside one fan-out batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TransactionId(pub u32);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    /// Create a guest
    CreateGuestRequest,
    /// Reply to [`MessageKind::CreateGuestRequest`]
    CreateGuestResponse,
    /// Delete a guest
    DeleteGuestRequest,
    /// Reply to [`MessageKind::DeleteGuestRequest`]
    DeleteGuestResponse,
    /// Stop a running guest
    StopInstanceRequest,
    /// Reply to [`MessageKind::StopInstanceRequest`]
    StopInstanceResponse,
    /// Create a disk image (sent by admins, and to the image server)
    CreateDiskImageRequest,
    /// Reply to [`MessageKind::CreateDiskImageRequest`]
    CreateDiskImageResponse,
    /// Ask a cell to upload a guest disk into an image record
    UploadDiskImageRequest,
    /// Reply to [`MessageKind::UploadDiskImageRequest`]
    UploadDiskImageResponse,
    /// Delete a disk image on the image server
    DeleteDiskImageRequest,
    /// Reply to [`MessageKind::DeleteDiskImageRequest`]
    DeleteDiskImageResponse,
    /// Reset a guest system disk back to its image
    ResetSystemRequest,
    /// Reply to [`MessageKind::ResetSystemRequest`]
    ResetSystemResponse,
    /// Change the storage path a cell keeps guest volumes under
    ModifyStoragePathRequest,
    /// Reply to [`MessageKind::ModifyStoragePathRequest`]
    ModifyStoragePathResponse,
    /// Migrate instances between cells
    MigrateInstanceRequest,
    /// Reply to [`MessageKind::MigrateInstanceRequest`]
    MigrateInstanceResponse,
    /// Attach instances to a cell
    AttachInstanceRequest,
    /// Reply to [`MessageKind::AttachInstanceRequest`]
    AttachInstanceResponse,
    /// Detach instances from a cell
    DetachInstanceRequest,
    /// Reply to [`MessageKind::DetachInstanceRequest`]
    DetachInstanceResponse,
    /// Create a batch of guests
    BatchCreateGuestRequest,
    /// Reply to [`MessageKind::BatchCreateGuestRequest`]
    BatchCreateGuestResponse,
    /// Delete a batch of guests
    BatchDeleteGuestRequest,
    /// Reply to [`MessageKind::BatchDeleteGuestRequest`]
    BatchDeleteGuestResponse,
    /// Stop a batch of guests
    BatchStopGuestRequest,
    /// Reply to [`MessageKind::BatchStopGuestRequest`]
    BatchStopGuestResponse,
    /// Query a batch job
    QueryBatchStatusRequest,
    /// Reply to [`MessageKind::QueryBatchStatusRequest`]
    QueryBatchStatusResponse,
    /// A cell started a guest
    GuestStartedEvent,
    /// A cell stopped a guest
    GuestStoppedEvent,
    /// Tell a target cell that its attached instances were released by the source.
    /// Fire-and-forget; completion comes back as [`MessageKind::InstanceMigratedEvent`].
    MigrationNotify,
    /// A target cell finished taking over migrated instances
    InstanceMigratedEvent,
    /// A cell dropped its connection
    CellDisconnectedEvent,
}

impl MessageKind {
    /// Stable opcode name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::CreateGuestRequest => "create_guest_request",
            MessageKind::CreateGuestResponse => "create_guest_response",
            MessageKind::DeleteGuestRequest => "delete_guest_request",
            MessageKind::DeleteGuestResponse => "delete_guest_response",
            MessageKind::StopInstanceRequest => "stop_instance_request",
            MessageKind::StopInstanceResponse => "stop_instance_response",
            MessageKind::CreateDiskImageRequest => "create_disk_image_request",
            MessageKind::CreateDiskImageResponse => "create_disk_image_response",
            MessageKind::UploadDiskImageRequest => "upload_disk_image_request",
            MessageKind::UploadDiskImageResponse => "upload_disk_image_response",
            MessageKind::DeleteDiskImageRequest => "delete_disk_image_request",
            MessageKind::DeleteDiskImageResponse => "delete_disk_image_response",
            MessageKind::ResetSystemRequest => "reset_system_request",
            MessageKind::ResetSystemResponse => "reset_system_response",
            MessageKind::ModifyStoragePathRequest => "modify_storage_path_request",
            MessageKind::ModifyStoragePathResponse => "modify_storage_path_response",
            MessageKind::MigrateInstanceRequest => "migrate_instance_request",
            MessageKind::MigrateInstanceResponse => "migrate_instance_response",
            MessageKind::AttachInstanceRequest => "attach_instance_request",
            MessageKind::AttachInstanceResponse => "attach_instance_response",
            MessageKind::DetachInstanceRequest => "detach_instance_request",
            MessageKind::DetachInstanceResponse => "detach_instance_response",
            MessageKind::BatchCreateGuestRequest => "batch_create_guest_request",
            MessageKind::BatchCreateGuestResponse => "batch_create_guest_response",
            MessageKind::BatchDeleteGuestRequest => "batch_delete_guest_request",
            MessageKind::BatchDeleteGuestResponse => "batch_delete_guest_response",
            MessageKind::BatchStopGuestRequest => "batch_stop_guest_request",
            MessageKind::BatchStopGuestResponse => "batch_stop_guest_response",
            MessageKind::QueryBatchStatusRequest => "query_batch_status_request",
            MessageKind::QueryBatchStatusResponse => "query_batch_status_response",
            MessageKind::GuestStartedEvent => "guest_started_event",
            MessageKind::GuestStoppedEvent => "guest_stopped_event",
            MessageKind::MigrationNotify => "migration_notify",
            MessageKind::InstanceMigratedEvent => "instance_migrated_event",
            MessageKind::CellDisconnectedEvent => "cell_disconnected_event",
        }
    }

    /// The reply kind a request of this kind is answered with, if any
    pub fn response_kind(&self) -> Option<MessageKind> {
        let kind = match self {
            MessageKind::CreateGuestRequest => MessageKind::CreateGuestResponse,
            MessageKind::DeleteGuestRequest => MessageKind::DeleteGuestResponse,
            MessageKind::StopInstanceRequest => MessageKind::StopInstanceResponse,
            MessageKind::CreateDiskImageRequest => MessageKind::CreateDiskImageResponse,
            MessageKind::UploadDiskImageRequest => MessageKind::UploadDiskImageResponse,
            MessageKind::DeleteDiskImageRequest => MessageKind::DeleteDiskImageResponse,
            MessageKind::ResetSystemRequest => MessageKind::ResetSystemResponse,
            MessageKind::ModifyStoragePathRequest => MessageKind::ModifyStoragePathResponse,
            MessageKind::MigrateInstanceRequest => MessageKind::MigrateInstanceResponse,
            MessageKind::AttachInstanceRequest => MessageKind::AttachInstanceResponse,
            MessageKind::DetachInstanceRequest => MessageKind::DetachInstanceResponse,
            MessageKind::BatchCreateGuestRequest => MessageKind::BatchCreateGuestResponse,
            MessageKind::BatchDeleteGuestRequest => MessageKind::BatchDeleteGuestResponse,
            MessageKind::BatchStopGuestRequest => MessageKind::BatchStopGuestResponse,
            MessageKind::QueryBatchStatusRequest => MessageKind::QueryBatchStatusResponse,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// UTF-8 string
    String(String),
    /// Boolean flag
    Bool(bool),
    /// Unsigned integer
    UInt(u64),
    /// Floating point number
    Float(f64),
    /// List of strings
    Strings(Vec<String>),
    /// List of unsigned integers
    UInts(Vec<u64>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Strings(_) => "string array",
            Value::UInts(_) => "uint array",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::Strings(value)
    }
}

impl From<Vec<u64>> for Value {
    fn from(value: Vec<u64>) -> Self {
        Value::UInts(value)
    }
}

/// Payload field lookup failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The field is absent
    #[error("missing field '{0}'")]
    Missing(String),

    /// The field exists with another type
    #[error("field '{key}' expects {expected}, got {actual}")]
    WrongType {
        /// Field name
        key: String,
        /// Requested type
        expected: &'static str,
        /// Type carried by the envelope
        actual: &'static str,
    },
}

/// Well-known payload keys
pub mod keys {
    /// Guest name
    pub const NAME: &str = "name";
    /// Pool name
    pub const POOL: &str = "pool";
    /// Cell name
    pub const CELL: &str = "cell";
    /// Source cell of a migration
    pub const SOURCE_CELL: &str = "source_cell";
    /// Target cell of a migration
    pub const TARGET_CELL: &str = "target_cell";
    /// Single instance id
    pub const INSTANCE: &str = "instance";
    /// Instance id list
    pub const INSTANCES: &str = "instances";
    /// Guest owner
    pub const OWNER: &str = "owner";
    /// System template id
    pub const TEMPLATE: &str = "template";
    /// Security policy group id
    pub const SECURITY_POLICY: &str = "security_policy";
    /// Disk image id
    pub const IMAGE: &str = "image";
    /// Image server name
    pub const IMAGE_SERVER: &str = "image_server";
    /// Disk sizes in GiB
    pub const DISKS: &str = "disks";
    /// CPU cores
    pub const CORES: &str = "cores";
    /// Memory in MiB
    pub const MEMORY: &str = "memory";
    /// Start the guest once created
    pub const AUTO_START: &str = "auto_start";
    /// Attach without waiting for the source to release
    pub const IMMEDIATE: &str = "immediate";
    /// Migration record id
    pub const MIGRATION: &str = "migration";
    /// Monitor ports assigned to migrated instances
    pub const MONITOR_PORTS: &str = "monitor_ports";
    /// VNC/monitor secret
    pub const MONITOR_SECRET: &str = "monitor_secret";
    /// Storage path
    pub const PATH: &str = "path";
    /// Batch job id
    pub const BATCH: &str = "batch";
    /// Batch item names
    pub const ITEMS: &str = "items";
    /// Batch item states
    pub const STATUS: &str = "status";
    /// Batch item failure reasons
    pub const REASONS: &str = "reasons";
    /// Graceful disconnect flag
    pub const GRACEFUL: &str = "graceful";
    /// Free-form description
    pub const DESCRIPTION: &str = "description";
    /// Size in bytes
    pub const SIZE: &str = "size";
    /// Operating system family of the template
    pub const OPERATING_SYSTEM: &str = "operating_system";
}

/// Message exchanged between parties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opcode
    pub kind: MessageKind,

    /// Session the message originates from; replies are routed back here
    pub from_session: SessionId,

    /// Session the message is addressed to, unbound for new requests
    pub to_session: SessionId,

    /// Sub-correlation key inside a fan-out batch
    pub transaction_id: TransactionId,

    /// Logical name of the party the reply must be sent to
    pub sender: String,

    /// Outcome flag, meaningful on replies
    pub success: bool,

    /// Failure reason, meaningful when `success` is false
    pub error: String,

    /// Typed payload
    pub fields: BTreeMap<String, Value>,
}

impl Envelope {
    /// Create a new request envelope
    pub fn request(kind: MessageKind, sender: impl Into<String>) -> Self {
        Self {
            kind,
            from_session: SessionId::UNBOUND,
            to_session: SessionId::UNBOUND,
            transaction_id: TransactionId::default(),
            sender: sender.into(),
            success: false,
            error: String::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Create the reply to `request`: sessions swapped, transaction preserved.
    ///
    /// The reply starts out successful; use [`Envelope::failed`] to turn it
    /// into a failure reply.
    pub fn reply_to(request: &Envelope, kind: MessageKind, sender: impl Into<String>) -> Self {
        Self {
            kind,
            from_session: request.to_session,
            to_session: request.from_session,
            transaction_id: request.transaction_id,
            sender: sender.into(),
            success: true,
            error: String::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a payload field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Set the transaction id
    pub fn with_transaction(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    /// Set the originating session
    pub fn from_session(mut self, session: SessionId) -> Self {
        self.from_session = session;
        self
    }

    /// Set the target session
    pub fn to_session(mut self, session: SessionId) -> Self {
        self.to_session = session;
        self
    }

    /// Mark as a failure with the given reason
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        self.error = reason.into();
        self
    }

    /// Mark as successful
    pub fn succeeded(mut self) -> Self {
        self.success = true;
        self.error.clear();
        self
    }

    fn field(&self, key: &str) -> Result<&Value, FieldError> {
        self.fields
            .get(key)
            .ok_or_else(|| FieldError::Missing(key.to_string()))
    }

    fn wrong_type(key: &str, expected: &'static str, actual: &Value) -> FieldError {
        FieldError::WrongType {
            key: key.to_string(),
            expected,
            actual: actual.type_name(),
        }
    }

    /// Whether a field is present
    pub fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Read a string field
    pub fn string(&self, key: &str) -> Result<&str, FieldError> {
        match self.field(key)? {
            Value::String(s) => Ok(s),
            other => Err(Self::wrong_type(key, "string", other)),
        }
    }

    /// Read an optional string field, treating an empty string as absent
    pub fn optional_string(&self, key: &str) -> Result<Option<&str>, FieldError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(Self::wrong_type(key, "string", other)),
        }
    }

    /// Read a boolean field
    pub fn bool(&self, key: &str) -> Result<bool, FieldError> {
        match self.field(key)? {
            Value::Bool(b) => Ok(*b),
            other => Err(Self::wrong_type(key, "bool", other)),
        }
    }

    /// Read an optional boolean field
    pub fn optional_bool(&self, key: &str, default: bool) -> Result<bool, FieldError> {
        match self.fields.get(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(Self::wrong_type(key, "bool", other)),
        }
    }

    /// Read an optional unsigned integer field
    pub fn optional_uint(&self, key: &str, default: u64) -> Result<u64, FieldError> {
        match self.fields.get(key) {
            None => Ok(default),
            Some(Value::UInt(n)) => Ok(*n),
            Some(other) => Err(Self::wrong_type(key, "uint", other)),
        }
    }

    /// Read an unsigned integer field
    pub fn uint(&self, key: &str) -> Result<u64, FieldError> {
        match self.field(key)? {
            Value::UInt(n) => Ok(*n),
            other => Err(Self::wrong_type(key, "uint", other)),
        }
    }

    /// Read a float field
    pub fn float(&self, key: &str) -> Result<f64, FieldError> {
        match self.field(key)? {
            Value::Float(n) => Ok(*n),
            other => Err(Self::wrong_type(key, "float", other)),
        }
    }

    /// Read a string array field
    pub fn strings(&self, key: &str) -> Result<&[String], FieldError> {
        match self.field(key)? {
            Value::Strings(list) => Ok(list),
            other => Err(Self::wrong_type(key, "string array", other)),
        }
    }

    /// Read an unsigned integer array field
    pub fn uints(&self, key: &str) -> Result<&[u64], FieldError> {
        match self.field(key)? {
            Value::UInts(list) => Ok(list),
            other => Err(Self::wrong_type(key, "uint array", other)),
        }
    }
}
