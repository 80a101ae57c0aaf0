//! Domain Ports - Core trait definitions for the control plane
//!
//! These traits define the boundaries between the lifecycle logic and the
//! systems around it: backend drivers (southbound) and the metadata store
//! (eastbound). Adapters implement these traits to provide concrete
//! functionality.

use super::model::{
    AccessProtocol, DriverData, Entity, HostInfo, ReplicationMode, ReplicationType, StorageType,
    VolumeDataEntry,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Driver Roles
// =============================================================================

/// The three driver roles a backend may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverRole {
    Provision,
    Replication,
    Metrics,
}

impl std::fmt::Display for DriverRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverRole::Provision => write!(f, "provision"),
            DriverRole::Replication => write!(f, "replication"),
            DriverRole::Metrics => write!(f, "metrics"),
        }
    }
}

// =============================================================================
// Operation Names
// =============================================================================

// Driver operation names, used for metrics labels and error messages
pub const OP_SETUP: &str = "setup";
pub const OP_CREATE_VOLUME: &str = "create_volume";
pub const OP_EXTEND_VOLUME: &str = "extend_volume";
pub const OP_DELETE_VOLUME: &str = "delete_volume";
pub const OP_INITIALIZE_CONNECTION: &str = "initialize_connection";
pub const OP_TERMINATE_CONNECTION: &str = "terminate_connection";
pub const OP_CREATE_SNAPSHOT: &str = "create_snapshot";
pub const OP_DELETE_SNAPSHOT: &str = "delete_snapshot";
pub const OP_CREATE_VOLUME_GROUP: &str = "create_volume_group";
pub const OP_UPDATE_VOLUME_GROUP: &str = "update_volume_group";
pub const OP_DELETE_VOLUME_GROUP: &str = "delete_volume_group";
pub const OP_LIST_POOLS: &str = "list_pools";
pub const OP_CREATE_REPLICATION: &str = "create_replication";
pub const OP_DELETE_REPLICATION: &str = "delete_replication";
pub const OP_ENABLE_REPLICATION: &str = "enable_replication";
pub const OP_DISABLE_REPLICATION: &str = "disable_replication";
pub const OP_FAILOVER_REPLICATION: &str = "failover_replication";
pub const OP_COLLECT_METRICS: &str = "collect_metrics";

// =============================================================================
// Provisioning Options / Results
// =============================================================================

/// Input to `create_volume`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    /// GiB
    pub size: u64,
    pub availability_zone: String,
    pub pool_id: String,
    pub pool_name: String,
    pub profile_id: String,
    pub dock_id: String,
    pub driver_name: String,
    pub snapshot_id: Option<String>,
    pub snapshot_size: Option<u64>,
    /// Metadata the driver stored on the source snapshot
    pub snapshot_metadata: DriverData,
    pub source_volume_id: Option<String>,
    pub source_volume_metadata: DriverData,
    pub group_id: Option<String>,
    pub multi_attach: bool,
    /// Metadata already on the record, non-empty on re-drive
    pub metadata: DriverData,
}

/// Output of volume-shaped driver calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeResult {
    #[serde(default)]
    pub metadata: DriverData,
}

/// Input to `extend_volume`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendVolumeOpts {
    pub id: String,
    pub pool_name: String,
    /// New total size in GiB
    pub size: u64,
    /// Growth in GiB
    pub delta: u64,
    pub metadata: DriverData,
}

/// Input to `delete_volume`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteVolumeOpts {
    pub id: String,
    pub pool_name: String,
    pub size: u64,
    pub metadata: DriverData,
}

/// Input to `initialize_connection` / `terminate_connection`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOpts {
    pub attachment_id: String,
    pub volume_id: String,
    pub pool_name: String,
    pub host_info: HostInfo,
    pub access_protocol: Option<AccessProtocol>,
    pub multipath: bool,
    pub volume_metadata: DriverData,
    /// Connection data from `initialize_connection`, set on terminate
    pub connection_data: BTreeMap<String, serde_json::Value>,
}

/// Output of `initialize_connection`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub driver_volume_type: String,
    #[serde(default)]
    pub connection_data: BTreeMap<String, serde_json::Value>,
}

/// Input to `create_snapshot`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    pub volume_id: String,
    pub pool_name: String,
    pub size: u64,
    pub volume_metadata: DriverData,
    pub metadata: DriverData,
}

/// Output of `create_snapshot`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResult {
    #[serde(default)]
    pub metadata: DriverData,
}

/// Input to `delete_snapshot`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSnapshotOpts {
    pub id: String,
    pub volume_id: String,
    pub pool_name: String,
    pub metadata: DriverData,
}

/// A volume named in a group call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRef {
    pub id: String,
    pub size: u64,
    pub metadata: DriverData,
}

/// A snapshot named in a group delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRef {
    pub id: String,
    pub volume_id: String,
    pub metadata: DriverData,
}

/// Input to `create_volume_group`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeGroupOpts {
    pub id: String,
    pub name: String,
    pub pool_name: String,
    pub profile_ids: Vec<String>,
}

/// Output of `create_volume_group`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupResult {
    #[serde(default)]
    pub metadata: DriverData,
}

/// Input to `update_volume_group`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVolumeGroupOpts {
    pub id: String,
    pub pool_name: String,
    pub add_volumes: Vec<VolumeRef>,
    pub remove_volumes: Vec<VolumeRef>,
    pub metadata: DriverData,
}

/// Input to `delete_volume_group`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteVolumeGroupOpts {
    pub id: String,
    pub pool_name: String,
    pub volumes: Vec<VolumeRef>,
    pub snapshots: Vec<SnapshotRef>,
    pub metadata: DriverData,
}

/// Per-volume outcome of a group call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "reason")]
pub enum VolumeOutcome {
    Ok,
    Failed(String),
}

/// Output of group update/delete. Volumes missing from the map succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupOutcome {
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeOutcome>,
}

impl VolumeGroupOutcome {
    pub fn failure_for(&self, volume_id: &str) -> Option<&str> {
        match self.volumes.get(volume_id) {
            Some(VolumeOutcome::Failed(reason)) => Some(reason.as_str()),
            _ => None,
        }
    }
}

/// A pool as reported by a driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
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
}

// =============================================================================
// Volume Driver Port
// =============================================================================

/// Provisioning contract every block/file backend driver satisfies
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Driver name as registered
    fn name(&self) -> &str;

    /// Connect to the backend; retried by the driver manager until it succeeds
    async fn setup(&self) -> Result<()>;

    /// Release backend resources
    async fn unset(&self) -> Result<()>;

    async fn create_volume(&self, opts: &CreateVolumeOpts) -> Result<VolumeResult>;

    async fn extend_volume(&self, opts: &ExtendVolumeOpts) -> Result<VolumeResult>;

    async fn delete_volume(&self, opts: &DeleteVolumeOpts) -> Result<()>;

    async fn initialize_connection(&self, opts: &ConnectionOpts) -> Result<ConnectionInfo>;

    async fn terminate_connection(&self, opts: &ConnectionOpts) -> Result<()>;

    async fn create_snapshot(&self, opts: &CreateSnapshotOpts) -> Result<SnapshotResult>;

    async fn delete_snapshot(&self, opts: &DeleteSnapshotOpts) -> Result<()>;

    async fn create_volume_group(&self, opts: &CreateVolumeGroupOpts) -> Result<VolumeGroupResult>;

    async fn update_volume_group(&self, opts: &UpdateVolumeGroupOpts)
        -> Result<VolumeGroupOutcome>;

    async fn delete_volume_group(&self, opts: &DeleteVolumeGroupOpts)
        -> Result<VolumeGroupOutcome>;

    /// Pools this backend currently exposes
    async fn list_pools(&self) -> Result<Vec<PoolSpec>>;
}

// =============================================================================
// Replication Driver Port
// =============================================================================

/// Input to every replication driver call, issued once per side
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationOpts {
    pub id: String,
    pub name: String,
    /// Which side this call is issued for
    pub is_primary: bool,
    pub primary_volume_id: String,
    pub secondary_volume_id: String,
    pub primary_volume_metadata: DriverData,
    pub secondary_volume_metadata: DriverData,
    pub primary_replication_driver_data: DriverData,
    pub secondary_replication_driver_data: DriverData,
    pub replication_mode: ReplicationMode,
    pub replication_period: u64,
    pub replication_bandwidth: u64,
    pub availability_zone: String,
    pub profile_id: String,
    /// Every replicated volume in the tenant's catalogue (host-based only)
    pub volume_data_list: Vec<VolumeDataEntry>,
}

/// Driver data returned by a replication call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationResult {
    #[serde(default)]
    pub primary_replication_driver_data: DriverData,
    #[serde(default)]
    pub secondary_replication_driver_data: DriverData,
}

/// Failover parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverOpts {
    pub allow_attached_volume: bool,
    pub secondary_backend_id: String,
}

/// Replication contract for array- or host-based replication backends
#[async_trait]
pub trait ReplicationDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn setup(&self) -> Result<()>;

    async fn unset(&self) -> Result<()>;

    async fn create_replication(&self, opts: &ReplicationOpts) -> Result<ReplicationResult>;

    async fn delete_replication(&self, opts: &ReplicationOpts) -> Result<()>;

    async fn enable_replication(&self, opts: &ReplicationOpts) -> Result<()>;

    async fn disable_replication(&self, opts: &ReplicationOpts) -> Result<()>;

    async fn failover_replication(
        &self,
        opts: &ReplicationOpts,
        failover: &FailoverOpts,
    ) -> Result<()>;
}

// =============================================================================
// Metrics Driver Port
// =============================================================================

/// Input to `collect_metrics`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectMetricsOpts {
    /// Volume, pool or backend the metrics describe
    pub instance_id: String,
    /// Empty means every supported metric
    #[serde(default)]
    pub metric_names: Vec<String>,
}

/// One collected sample
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub instance_id: String,
    pub name: String,
    pub unit: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Metrics collection contract
#[async_trait]
pub trait MetricsDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn setup(&self) -> Result<()>;

    async fn unset(&self) -> Result<()>;

    async fn supported_metrics(&self) -> Result<Vec<String>>;

    async fn collect_metrics(&self, opts: &CollectMetricsOpts) -> Result<Vec<MetricSample>>;
}

// =============================================================================
// Metadata Store Port
// =============================================================================

/// Sort direction for list calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// Filter and paging for list calls.
///
/// `fields` match camelCase keys of the serialized record by string value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilter {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub sort_dir: SortDir,
    /// Restrict to one tenant; `None` lists everything
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }
}

/// Atomic read-modify-write applied by [`Table::update`]
pub type Mutation<T> = Box<dyn FnOnce(&mut T) -> Result<()> + Send>;

/// Typed persistence for one entity kind
#[async_trait]
pub trait Table<T: Entity>: Send + Sync {
    /// Insert a new record; fails if the id is taken
    async fn create(&self, record: T) -> Result<T>;

    async fn get(&self, id: &str) -> Result<Option<T>>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<T>>;

    /// Apply `mutate` atomically to the stored record.
    ///
    /// If `mutate` returns an error nothing is written.
    async fn update(&self, id: &str, mutate: Mutation<T>) -> Result<T>;

    /// Remove a record, returning it if it existed
    async fn delete(&self, id: &str) -> Result<Option<T>>;

    async fn must_get(&self, id: &str) -> Result<T> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::not_found(T::KIND, id))
    }
}

/// Typed access to every collection the control plane owns
pub trait MetadataStore: Send + Sync {
    fn volumes(&self) -> &dyn Table<super::model::Volume>;

    fn attachments(&self) -> &dyn Table<super::model::Attachment>;

    fn snapshots(&self) -> &dyn Table<super::model::Snapshot>;

    fn groups(&self) -> &dyn Table<super::model::VolumeGroup>;

    fn replications(&self) -> &dyn Table<super::model::ReplicationPair>;

    fn profiles(&self) -> &dyn Table<super::model::Profile>;

    fn pools(&self) -> &dyn Table<super::model::Pool>;

    fn docks(&self) -> &dyn Table<super::model::Dock>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type VolumeDriverRef = Arc<dyn VolumeDriver>;
pub type ReplicationDriverRef = Arc<dyn ReplicationDriver>;
pub type MetricsDriverRef = Arc<dyn MetricsDriver>;
pub type MetadataStoreRef = Arc<dyn MetadataStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_role_display() {
        assert_eq!(format!("{}", DriverRole::Provision), "provision");
        assert_eq!(format!("{}", DriverRole::Replication), "replication");
        assert_eq!(format!("{}", DriverRole::Metrics), "metrics");
    }

    #[test]
    fn test_group_outcome_defaults_to_success() {
        let mut outcome = VolumeGroupOutcome::default();
        outcome
            .volumes
            .insert("v2".into(), VolumeOutcome::Failed("busy".into()));

        assert_eq!(outcome.failure_for("v1"), None);
        assert_eq!(outcome.failure_for("v2"), Some("busy"));
    }

    #[test]
    fn test_list_filter_builder() {
        let filter = ListFilter::new()
            .field("volumeId", "v1")
            .tenant(Some("t1".into()));
        assert_eq!(filter.fields.get("volumeId").map(String::as_str), Some("v1"));
        assert_eq!(filter.tenant_id.as_deref(), Some("t1"));
        assert_eq!(filter.sort_dir, SortDir::Asc);
    }
}
