//! Domain Model - Entities owned by the control plane
//!
//! Every record shares a [`BaseModel`] (UUID, timestamps, owner). Records
//! reference each other by id only; the metadata store resolves ids at
//! call time.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque driver-private strings persisted against an entity
pub type DriverData = BTreeMap<String, String>;

// =============================================================================
// Entity Traits
// =============================================================================

/// A record persisted by the metadata store
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name, also used in error messages
    const KIND: &'static str;

    fn base(&self) -> &BaseModel;

    fn base_mut(&mut self) -> &mut BaseModel;

    fn id(&self) -> &str {
        &self.base().id
    }

    fn tenant_id(&self) -> &str {
        &self.base().tenant_id
    }
}

/// Status values with a documented transition table
pub trait LifecycleStatus: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Whether `self -> next` appears in the state machine
    fn can_transition_to(self, next: Self) -> bool;
}

/// An entity driven through a state machine
pub trait Stateful: Entity {
    type Status: LifecycleStatus;

    fn status(&self) -> Self::Status;

    fn set_status(&mut self, status: Self::Status);

    fn set_error_reason(&mut self, reason: Option<String>);
}

// =============================================================================
// Base Model
// =============================================================================

/// Fields shared by every record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseModel {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
}

impl BaseModel {
    /// New base with the given id, or a fresh v4 UUID
    pub fn new(id: Option<String>, tenant_id: &str, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            created_at: now,
            updated_at: now,
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Shared Enums
// =============================================================================

/// Storage class a profile or pool serves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Block,
    File,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Block => write!(f, "block"),
            StorageType::File => write!(f, "file"),
        }
    }
}

/// Host access protocol for attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessProtocol {
    Iscsi,
    Rbd,
    FibreChannel,
    Nvmeof,
    Nfs,
}

impl fmt::Display for AccessProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessProtocol::Iscsi => write!(f, "iscsi"),
            AccessProtocol::Rbd => write!(f, "rbd"),
            AccessProtocol::FibreChannel => write!(f, "fibre_channel"),
            AccessProtocol::Nvmeof => write!(f, "nvmeof"),
            AccessProtocol::Nfs => write!(f, "nfs"),
        }
    }
}

/// Replication capability of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationType {
    #[default]
    None,
    Host,
    Array,
}

impl fmt::Display for ReplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationType::None => write!(f, "none"),
            ReplicationType::Host => write!(f, "host"),
            ReplicationType::Array => write!(f, "array"),
        }
    }
}

/// Replication mode of a pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    Sync,
    #[default]
    Async,
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationMode::Sync => write!(f, "sync"),
            ReplicationMode::Async => write!(f, "async"),
        }
    }
}

// =============================================================================
// Status Enums
// =============================================================================

/// Declares a status enum with its wire names
macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_enum!(
    /// Volume lifecycle status
    VolumeStatus {
        Creating => "creating",
        Available => "available",
        InUse => "inUse",
        Attaching => "attaching",
        Extending => "extending",
        Deleting => "deleting",
        ErrorDeleting => "errorDeleting",
        Error => "error",
    }
);

impl LifecycleStatus for VolumeStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use VolumeStatus::*;
        matches!(
            (self, next),
            (Creating, Available)
                | (Creating, Error)
                | (Available, Extending)
                | (Extending, Available)
                | (Extending, Error)
                | (Available, Attaching)
                | (InUse, Attaching)
                | (Attaching, InUse)
                | (Attaching, Available)
                | (Attaching, Error)
                | (InUse, Available)
                | (Available, Error)
                | (Available, Deleting)
                | (InUse, Deleting)
                | (Error, Deleting)
                | (ErrorDeleting, Deleting)
                | (Deleting, ErrorDeleting)
        )
    }
}

status_enum!(
    /// Attachment lifecycle status
    AttachmentStatus {
        Creating => "creating",
        Attaching => "attaching",
        Available => "available",
        Error => "error",
        ErrorDeleting => "errorDeleting",
    }
);

impl LifecycleStatus for AttachmentStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use AttachmentStatus::*;
        matches!(
            (self, next),
            (Creating, Attaching)
                | (Creating, Error)
                | (Attaching, Available)
                | (Attaching, Error)
                | (Available, ErrorDeleting)
                | (Error, ErrorDeleting)
        )
    }
}

status_enum!(
    /// Snapshot lifecycle status
    SnapshotStatus {
        Creating => "creating",
        Available => "available",
        Deleting => "deleting",
        ErrorDeleting => "errorDeleting",
        Error => "error",
    }
);

impl LifecycleStatus for SnapshotStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use SnapshotStatus::*;
        matches!(
            (self, next),
            (Creating, Available)
                | (Creating, Error)
                | (Available, Deleting)
                | (Error, Deleting)
                | (ErrorDeleting, Deleting)
                | (Deleting, ErrorDeleting)
        )
    }
}

status_enum!(
    /// Volume group lifecycle status
    GroupStatus {
        Creating => "creating",
        Available => "available",
        Updating => "updating",
        Deleting => "deleting",
        Error => "error",
    }
);

impl LifecycleStatus for GroupStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use GroupStatus::*;
        matches!(
            (self, next),
            (Creating, Available)
                | (Creating, Error)
                | (Available, Updating)
                | (Updating, Available)
                | (Updating, Error)
                | (Available, Deleting)
                | (Error, Deleting)
                | (Deleting, Error)
        )
    }
}

status_enum!(
    /// Replication pair lifecycle status
    ReplicationStatus {
        Creating => "creating",
        Available => "available",
        Enabled => "enabled",
        Enabling => "enabling",
        Disabled => "disabled",
        Disabling => "disabling",
        Failovering => "failovering",
        FailedOver => "failed_over",
        Deleting => "deleting",
        ErrorDeleting => "errorDeleting",
        Error => "error",
    }
);

impl LifecycleStatus for ReplicationStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use ReplicationStatus::*;
        match (self, next) {
            (Creating, Available) | (Creating, Error) => true,
            (Available, Enabling) | (Disabled, Enabling) => true,
            (Enabling, Enabled) | (Enabling, Available) | (Enabling, Disabled) => true,
            (Enabled, Disabling) => true,
            (Disabling, Available) | (Disabling, Error) => true,
            (Available, Failovering) | (Enabled, Failovering) => true,
            (Failovering, FailedOver) | (Failovering, Error) => true,
            (Deleting, ErrorDeleting) => true,
            (from, Deleting) => matches!(
                from,
                Available | Enabled | Disabled | FailedOver | Error | ErrorDeleting
            ),
            _ => false,
        }
    }
}

// =============================================================================
// Volume
// =============================================================================

/// Logical unit of block storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    #[serde(flatten)]
    pub base: BaseModel,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Size in GiB
    pub size: u64,
    pub status: VolumeStatus,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub pool_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub source_volume_id: Option<String>,
    #[serde(default)]
    pub multi_attach: bool,
    #[serde(default)]
    pub replication_driver_data: DriverData,
    #[serde(default)]
    pub metadata: DriverData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl Entity for Volume {
    const KIND: &'static str = "volume";

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

impl Stateful for Volume {
    type Status = VolumeStatus;

    fn status(&self) -> VolumeStatus {
        self.status
    }

    fn set_status(&mut self, status: VolumeStatus) {
        self.status = status;
    }

    fn set_error_reason(&mut self, reason: Option<String>) {
        self.error_reason = reason;
    }
}

// =============================================================================
// Attachment
// =============================================================================

/// Host characteristics supplied by the caller or a dock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub initiator: String,
    #[serde(default)]
    pub wwpns: Vec<String>,
}

impl HostInfo {
    /// Host info advertised in a dock's metadata
    pub fn from_dock(dock: &Dock) -> Self {
        let get = |key: &str| dock.metadata.get(key).cloned().unwrap_or_default();
        Self {
            platform: get("platform"),
            os_type: get("osType"),
            ip: get("hostIp"),
            host: dock.node_id.clone(),
            initiator: get("initiator"),
            wwpns: dock
                .metadata
                .get("wwpns")
                .map(|w| w.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// Who owns an attachment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentPurpose {
    #[default]
    User,
    /// Bridging attachment read by a host-based replication mover
    ReplicationBridge,
}

/// Association between a volume and a host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(flatten)]
    pub base: BaseModel,
    pub volume_id: String,
    pub host_info: HostInfo,
    #[serde(default)]
    pub access_protocol: Option<AccessProtocol>,
    #[serde(default)]
    pub driver_volume_type: String,
    #[serde(default)]
    pub connection_data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub multipath: bool,
    pub status: AttachmentStatus,
    #[serde(default)]
    pub purpose: AttachmentPurpose,
    /// Volume status before the attach began, restored on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_volume_status: Option<VolumeStatus>,
    #[serde(default)]
    pub metadata: DriverData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl Entity for Attachment {
    const KIND: &'static str = "attachment";

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

impl Stateful for Attachment {
    type Status = AttachmentStatus;

    fn status(&self) -> AttachmentStatus {
        self.status
    }

    fn set_status(&mut self, status: AttachmentStatus) {
        self.status = status;
    }

    fn set_error_reason(&mut self, reason: Option<String>) {
        self.error_reason = reason;
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time copy of a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(flatten)]
    pub base: BaseModel,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub volume_id: String,
    /// Size in GiB, equal to the volume size when taken
    pub size: u64,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub metadata: DriverData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl Entity for Snapshot {
    const KIND: &'static str = "snapshot";

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

impl Stateful for Snapshot {
    type Status = SnapshotStatus;

    fn status(&self) -> SnapshotStatus {
        self.status
    }

    fn set_status(&mut self, status: SnapshotStatus) {
        self.status = status;
    }

    fn set_error_reason(&mut self, reason: Option<String>) {
        self.error_reason = reason;
    }
}

// =============================================================================
// Volume Group
// =============================================================================

/// Consistency unit over volumes of one pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroup {
    #[serde(flatten)]
    pub base: BaseModel,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pool_id: String,
    #[serde(default)]
    pub availability_zone: String,
    pub profile_ids: Vec<String>,
    pub status: GroupStatus,
    #[serde(default)]
    pub metadata: DriverData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl Entity for VolumeGroup {
    const KIND: &'static str = "group";

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

impl Stateful for VolumeGroup {
    type Status = GroupStatus;

    fn status(&self) -> GroupStatus {
        self.status
    }

    fn set_status(&mut self, status: GroupStatus) {
        self.status = status;
    }

    fn set_error_reason(&mut self, reason: Option<String>) {
        self.error_reason = reason;
    }
}

// =============================================================================
// Replication Pair
// =============================================================================

/// One replicated volume as reported to host-based movers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDataEntry {
    pub volume_id: String,
    pub size: u64,
    pub pool_id: String,
    #[serde(default)]
    pub replication_driver_data: DriverData,
}

/// Two linked volumes on different backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationPair {
    #[serde(flatten)]
    pub base: BaseModel,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub primary_volume_id: String,
    pub secondary_volume_id: String,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub replication_mode: ReplicationMode,
    /// Seconds between async syncs
    #[serde(default)]
    pub replication_period: u64,
    #[serde(default)]
    pub replication_bandwidth: u64,
    /// Replication type of both pools, fixed at creation
    #[serde(default)]
    pub replication_type: ReplicationType,
    #[serde(default)]
    pub primary_replication_driver_data: DriverData,
    #[serde(default)]
    pub secondary_replication_driver_data: DriverData,
    pub status: ReplicationStatus,
    #[serde(default)]
    pub volume_data_list: Vec<VolumeDataEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl Entity for ReplicationPair {
    const KIND: &'static str = "replication";

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

impl Stateful for ReplicationPair {
    type Status = ReplicationStatus;

    fn status(&self) -> ReplicationStatus {
        self.status
    }

    fn set_status(&mut self, status: ReplicationStatus) {
        self.status = status;
    }

    fn set_error_reason(&mut self, reason: Option<String>) {
        self.error_reason = reason;
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Placement and capability hints carried by a profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileProperties {
    /// Pin attachments to one protocol
    #[serde(default)]
    pub access_protocol: Option<AccessProtocol>,
    /// Replication capability the pool must offer
    #[serde(default)]
    pub replication_type: Option<ReplicationType>,
    #[serde(default)]
    pub multi_attach: bool,
    /// Restrict placement to a pool
    #[serde(default)]
    pub pool_id: Option<String>,
    #[serde(default)]
    pub qos: BTreeMap<String, String>,
    #[serde(default)]
    pub provisioning: BTreeMap<String, String>,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl ProfileProperties {
    /// Whether the profile asks for a replication-capable pool
    pub fn requests_replication(&self) -> bool {
        matches!(
            self.replication_type,
            Some(ReplicationType::Host) | Some(ReplicationType::Array)
        )
    }
}

/// Named storage policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub base: BaseModel,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub storage_type: StorageType,
    #[serde(default)]
    pub properties: ProfileProperties,
}

impl Entity for Profile {
    const KIND: &'static str = "profile";

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Extras key advertising consistency group support
pub const POOL_EXTRA_CONSISTENCY_GROUP: &str = "consistencyGroup";

/// Advertised backend capacity slice
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    #[serde(flatten)]
    pub base: BaseModel,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub dock_id: String,
    /// Backend whose drivers serve this pool
    pub backend_name: String,
    /// GiB
    pub total_capacity: u64,
    /// GiB
    pub free_capacity: u64,
    pub storage_type: StorageType,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub access_protocols: Vec<AccessProtocol>,
    #[serde(default)]
    pub replication_type: ReplicationType,
    #[serde(default)]
    pub multi_attach: bool,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
    /// Last refresh from the driver failed
    #[serde(default)]
    pub stale: bool,
}

impl Pool {
    pub fn supports_consistency_groups(&self) -> bool {
        self.extras
            .get(POOL_EXTRA_CONSISTENCY_GROUP)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Stable id for a pool name under a dock
    pub fn derive_id(dock_id: &str, pool_name: &str) -> String {
        uuid::Uuid::new_v5(
            &uuid::Uuid::NAMESPACE_OID,
            format!("{}/{}", dock_id, pool_name).as_bytes(),
        )
        .to_string()
    }
}

impl Entity for Pool {
    const KIND: &'static str = "pool";

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

// =============================================================================
// Dock
// =============================================================================

/// A running backend-driver instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dock {
    #[serde(flatten)]
    pub base: BaseModel,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub node_id: String,
    pub endpoint: String,
    pub driver_name: String,
    pub backend_name: String,
    pub storage_type: StorageType,
    /// Host characteristics: platform, osType, initiator, wwpns, hostIp
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Dock {
    /// Stable id for a backend on a node
    pub fn derive_id(node_id: &str, backend_name: &str) -> String {
        uuid::Uuid::new_v5(
            &uuid::Uuid::NAMESPACE_OID,
            format!("dock/{}/{}", node_id, backend_name).as_bytes(),
        )
        .to_string()
    }
}

impl Entity for Dock {
    const KIND: &'static str = "dock";

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(VolumeStatus::InUse.to_string(), "inUse");
        assert_eq!(ReplicationStatus::FailedOver.to_string(), "failed_over");
        assert_eq!(
            serde_json::to_string(&SnapshotStatus::ErrorDeleting).unwrap(),
            "\"errorDeleting\""
        );
        assert_eq!(AccessProtocol::FibreChannel.to_string(), "fibre_channel");
    }

    #[test]
    fn test_volume_transitions() {
        assert!(VolumeStatus::Creating.can_transition_to(VolumeStatus::Available));
        assert!(VolumeStatus::ErrorDeleting.can_transition_to(VolumeStatus::Deleting));
        assert!(!VolumeStatus::Creating.can_transition_to(VolumeStatus::InUse));
        assert!(!VolumeStatus::Deleting.can_transition_to(VolumeStatus::Available));
    }

    #[test]
    fn test_replication_transitions() {
        use ReplicationStatus::*;
        assert!(Enabled.can_transition_to(Failovering));
        assert!(FailedOver.can_transition_to(Deleting));
        assert!(!Creating.can_transition_to(Deleting));
        assert!(!Enabled.can_transition_to(Enabled));
    }

    #[test]
    fn test_volume_record_shape() {
        let volume = Volume {
            base: BaseModel::new(Some("v1".into()), "tenant-a", "user-a"),
            name: "data".into(),
            description: String::new(),
            size: 10,
            status: VolumeStatus::Available,
            availability_zone: "default".into(),
            pool_id: "p1".into(),
            profile_id: "gold".into(),
            group_id: None,
            snapshot_id: None,
            source_volume_id: None,
            multi_attach: false,
            replication_driver_data: DriverData::new(),
            metadata: DriverData::new(),
            error_reason: None,
        };

        let value = serde_json::to_value(&volume).unwrap();
        assert_eq!(value["id"], "v1");
        assert_eq!(value["tenantId"], "tenant-a");
        assert_eq!(value["status"], "available");
        assert!(value.get("errorReason").is_none());
    }

    #[test]
    fn test_pool_ids_are_stable() {
        assert_eq!(Pool::derive_id("d1", "gold"), Pool::derive_id("d1", "gold"));
        assert_ne!(Pool::derive_id("d1", "gold"), Pool::derive_id("d2", "gold"));
    }
}
