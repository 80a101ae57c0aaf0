//! Sample Driver
//!
//! In-memory reference driver serving all three roles. It keeps enough state
//! to behave like a real backend (pool capacity, volumes, snapshots,
//! connections) and exposes fault injection plus a call journal so lifecycle
//! and replication behaviour can be exercised end to end.

use crate::config::BackendConfig;
use crate::domain::model::{
    AccessProtocol, ReplicationType, StorageType, POOL_EXTRA_CONSISTENCY_GROUP,
};
use crate::domain::ports::{
    CollectMetricsOpts, ConnectionInfo, ConnectionOpts, CreateSnapshotOpts, CreateVolumeGroupOpts,
    CreateVolumeOpts, DeleteSnapshotOpts, DeleteVolumeGroupOpts, DeleteVolumeOpts,
    ExtendVolumeOpts, FailoverOpts, MetricSample, MetricsDriver, PoolSpec, ReplicationDriver,
    ReplicationOpts, ReplicationResult, SnapshotResult, UpdateVolumeGroupOpts, VolumeDriver,
    VolumeGroupOutcome, VolumeGroupResult, VolumeOutcome, VolumeResult,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

pub use crate::domain::ports::{
    OP_COLLECT_METRICS, OP_CREATE_REPLICATION, OP_CREATE_SNAPSHOT, OP_CREATE_VOLUME,
    OP_CREATE_VOLUME_GROUP, OP_DELETE_REPLICATION, OP_DELETE_SNAPSHOT, OP_DELETE_VOLUME,
    OP_DELETE_VOLUME_GROUP, OP_DISABLE_REPLICATION, OP_ENABLE_REPLICATION, OP_EXTEND_VOLUME,
    OP_FAILOVER_REPLICATION, OP_INITIALIZE_CONNECTION, OP_LIST_POOLS, OP_SETUP,
    OP_TERMINATE_CONNECTION, OP_UPDATE_VOLUME_GROUP,
};

const SUPPORTED_METRICS: [&str; 3] = ["capacityUsed", "connections", "iops"];

/// A failure the driver is told to produce
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Every call of the operation fails
    Fail(&'static str),
    /// A replication operation fails on one side only
    FailSide { operation: &'static str, primary: bool },
    /// The operation never completes
    Hang(&'static str),
    /// Group update/delete reports this volume as failed
    GroupMember(String),
}

/// One journal entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: &'static str,
    /// Volume, snapshot, attachment, group or pair id the call targeted
    pub target: String,
    /// Side of a replication call
    pub primary: Option<bool>,
}

#[derive(Default)]
struct SampleState {
    pools: Vec<PoolSpec>,
    /// volume id -> (pool name, size)
    volumes: HashMap<String, (String, u64)>,
    snapshots: HashSet<String>,
    /// attachment id -> volume id
    connections: HashMap<String, String>,
    groups: HashSet<String>,
    /// (pair id, side)
    replications: HashSet<(String, bool)>,
}

impl SampleState {
    fn used(&self, pool: &str) -> u64 {
        self.volumes
            .values()
            .filter(|(p, _)| p == pool)
            .map(|(_, size)| size)
            .sum()
    }

    fn pool(&self, name: &str) -> Option<&PoolSpec> {
        self.pools.iter().find(|p| p.name == name)
    }

    fn free(&self, name: &str) -> Option<u64> {
        self.pool(name)
            .map(|p| p.free_capacity.saturating_sub(self.used(name)))
    }
}

// =============================================================================
// Sample Driver
// =============================================================================

/// Reference driver backed by process memory
pub struct SampleDriver {
    backend: String,
    state: Mutex<SampleState>,
    faults: Mutex<HashSet<Fault>>,
    journal: Mutex<Vec<Call>>,
    /// Setup calls to fail before succeeding
    setup_failures: AtomicU32,
}

impl SampleDriver {
    /// Driver exposing the given pools
    pub fn new(backend: &str, pools: Vec<PoolSpec>) -> Self {
        Self {
            backend: backend.to_string(),
            state: Mutex::new(SampleState {
                pools,
                ..Default::default()
            }),
            faults: Mutex::new(HashSet::new()),
            journal: Mutex::new(Vec::new()),
            setup_failures: AtomicU32::new(0),
        }
    }

    /// Pools come from `config_path` if set, else the inline `pools`, else
    /// one default pool
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let pools = if !config.config_path.is_empty() && Path::new(&config.config_path).exists() {
            let raw = std::fs::read_to_string(&config.config_path)?;
            let mut pools: Vec<PoolSpec> = serde_yaml::from_str(&raw)?;
            for pool in &mut pools {
                if pool.availability_zone.is_empty() {
                    pool.availability_zone = config.availability_zone.clone();
                }
            }
            pools
        } else if !config.pools.is_empty() {
            config.pools.clone()
        } else {
            vec![default_pool(config)]
        };
        Ok(Self::new(&config.name, pools))
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().insert(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Fail the next `n` setup attempts
    pub fn fail_setup(&self, n: u32) {
        self.setup_failures.store(n, Ordering::SeqCst);
    }

    pub fn journal(&self) -> Vec<Call> {
        self.journal.lock().clone()
    }

    /// Journal entries for one operation
    pub fn calls(&self, operation: &str) -> Vec<Call> {
        self.journal
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().volumes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    async fn enter(&self, operation: &'static str, target: &str, primary: Option<bool>) -> Result<()> {
        self.journal.lock().push(Call {
            operation,
            target: target.to_string(),
            primary,
        });
        debug!("sample[{}] {} {}", self.backend, operation, target);

        let (fail, hang) = {
            let faults = self.faults.lock();
            let side_fails = primary
                .map(|p| faults.contains(&Fault::FailSide { operation, primary: p }))
                .unwrap_or(false);
            (
                faults.contains(&Fault::Fail(operation)) || side_fails,
                faults.contains(&Fault::Hang(operation)),
            )
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }
        if fail {
            return Err(Error::driver("sample", operation, "injected fault"));
        }
        Ok(())
    }

    fn group_outcome(&self, volume_ids: impl Iterator<Item = String>) -> VolumeGroupOutcome {
        let faults = self.faults.lock();
        let volumes = volume_ids
            .filter(|id| faults.contains(&Fault::GroupMember(id.clone())))
            .map(|id| (id, VolumeOutcome::Failed("injected member fault".into())))
            .collect();
        VolumeGroupOutcome { volumes }
    }
}

fn default_pool(config: &BackendConfig) -> PoolSpec {
    let mut extras = BTreeMap::new();
    extras.insert(POOL_EXTRA_CONSISTENCY_GROUP.to_string(), "true".to_string());
    PoolSpec {
        name: format!("{}-pool", config.name),
        description: "sample pool".into(),
        total_capacity: 100,
        free_capacity: 100,
        storage_type: config.storage_type,
        availability_zone: config.availability_zone.clone(),
        access_protocols: match config.storage_type {
            StorageType::Block => vec![AccessProtocol::Iscsi],
            StorageType::File => vec![AccessProtocol::Nfs],
        },
        replication_type: ReplicationType::None,
        multi_attach: false,
        extras,
    }
}

#[async_trait]
impl VolumeDriver for SampleDriver {
    fn name(&self) -> &str {
        super::SAMPLE_DRIVER
    }

    async fn setup(&self) -> Result<()> {
        self.enter(OP_SETUP, &self.backend, None).await?;
        let remaining = self.setup_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.setup_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::driver("sample", OP_SETUP, "backend not reachable yet"));
        }
        Ok(())
    }

    async fn unset(&self) -> Result<()> {
        Ok(())
    }

    async fn create_volume(&self, opts: &CreateVolumeOpts) -> Result<VolumeResult> {
        self.enter(OP_CREATE_VOLUME, &opts.id, None).await?;
        let mut state = self.state.lock();

        if state.volumes.contains_key(&opts.id) {
            return Ok(volume_result(&opts.pool_name, &opts.id));
        }
        if let Some(snapshot_id) = &opts.snapshot_id {
            if !state.snapshots.contains(snapshot_id) {
                return Err(Error::driver(
                    "sample",
                    OP_CREATE_VOLUME,
                    format!("snapshot {} not found", snapshot_id),
                ));
            }
        }
        let free = state.free(&opts.pool_name).ok_or_else(|| {
            Error::driver(
                "sample",
                OP_CREATE_VOLUME,
                format!("pool {} not found", opts.pool_name),
            )
        })?;
        if free < opts.size {
            return Err(Error::driver(
                "sample",
                OP_CREATE_VOLUME,
                format!("pool {} has {} GiB free", opts.pool_name, free),
            ));
        }

        state
            .volumes
            .insert(opts.id.clone(), (opts.pool_name.clone(), opts.size));
        Ok(volume_result(&opts.pool_name, &opts.id))
    }

    async fn extend_volume(&self, opts: &ExtendVolumeOpts) -> Result<VolumeResult> {
        self.enter(OP_EXTEND_VOLUME, &opts.id, None).await?;
        let mut state = self.state.lock();

        let free = state.free(&opts.pool_name).unwrap_or(0);
        let (pool, size) = state
            .volumes
            .get_mut(&opts.id)
            .ok_or_else(|| Error::driver("sample", OP_EXTEND_VOLUME, "volume not found"))?;
        if opts.size > *size && opts.size - *size > free {
            return Err(Error::driver("sample", OP_EXTEND_VOLUME, "pool exhausted"));
        }
        *size = opts.size;
        Ok(volume_result(&pool.clone(), &opts.id))
    }

    async fn delete_volume(&self, opts: &DeleteVolumeOpts) -> Result<()> {
        self.enter(OP_DELETE_VOLUME, &opts.id, None).await?;
        self.state.lock().volumes.remove(&opts.id);
        Ok(())
    }

    async fn initialize_connection(&self, opts: &ConnectionOpts) -> Result<ConnectionInfo> {
        self.enter(OP_INITIALIZE_CONNECTION, &opts.attachment_id, None)
            .await?;
        let mut state = self.state.lock();
        if !state.volumes.contains_key(&opts.volume_id) {
            return Err(Error::driver(
                "sample",
                OP_INITIALIZE_CONNECTION,
                format!("volume {} not found", opts.volume_id),
            ));
        }
        state
            .connections
            .insert(opts.attachment_id.clone(), opts.volume_id.clone());

        let protocol = opts.access_protocol.unwrap_or(AccessProtocol::Iscsi);
        let mut connection_data = BTreeMap::new();
        match protocol {
            AccessProtocol::Iscsi => {
                connection_data.insert(
                    "targetIQN".into(),
                    json!(format!("iqn.2017-10.io.sample:{}", opts.volume_id)),
                );
                connection_data.insert("targetPortal".into(), json!("127.0.0.1:3260"));
                connection_data.insert("targetLun".into(), json!(1));
            }
            AccessProtocol::Rbd => {
                connection_data.insert("name".into(), json!(format!("rbd/{}", opts.volume_id)));
            }
            AccessProtocol::Nfs => {
                connection_data.insert(
                    "exportLocation".into(),
                    json!(format!("127.0.0.1:/exports/{}", opts.volume_id)),
                );
            }
            AccessProtocol::FibreChannel | AccessProtocol::Nvmeof => {
                connection_data.insert("targetId".into(), json!(opts.volume_id));
            }
        }
        connection_data.insert("hostIp".into(), json!(opts.host_info.ip));

        Ok(ConnectionInfo {
            driver_volume_type: protocol.to_string(),
            connection_data,
        })
    }

    async fn terminate_connection(&self, opts: &ConnectionOpts) -> Result<()> {
        self.enter(OP_TERMINATE_CONNECTION, &opts.attachment_id, None)
            .await?;
        self.state.lock().connections.remove(&opts.attachment_id);
        Ok(())
    }

    async fn create_snapshot(&self, opts: &CreateSnapshotOpts) -> Result<SnapshotResult> {
        self.enter(OP_CREATE_SNAPSHOT, &opts.id, None).await?;
        let mut state = self.state.lock();
        if !state.volumes.contains_key(&opts.volume_id) {
            return Err(Error::driver(
                "sample",
                OP_CREATE_SNAPSHOT,
                format!("volume {} not found", opts.volume_id),
            ));
        }
        state.snapshots.insert(opts.id.clone());

        let mut metadata = BTreeMap::new();
        metadata.insert("poolName".to_string(), opts.pool_name.clone());
        metadata.insert("snapshotName".to_string(), format!("snapshot-{}", opts.id));
        Ok(SnapshotResult { metadata })
    }

    async fn delete_snapshot(&self, opts: &DeleteSnapshotOpts) -> Result<()> {
        self.enter(OP_DELETE_SNAPSHOT, &opts.id, None).await?;
        self.state.lock().snapshots.remove(&opts.id);
        Ok(())
    }

    async fn create_volume_group(&self, opts: &CreateVolumeGroupOpts) -> Result<VolumeGroupResult> {
        self.enter(OP_CREATE_VOLUME_GROUP, &opts.id, None).await?;
        self.state.lock().groups.insert(opts.id.clone());

        let mut metadata = BTreeMap::new();
        metadata.insert("consistencyGroupName".to_string(), format!("cg-{}", opts.id));
        Ok(VolumeGroupResult { metadata })
    }

    async fn update_volume_group(
        &self,
        opts: &UpdateVolumeGroupOpts,
    ) -> Result<VolumeGroupOutcome> {
        self.enter(OP_UPDATE_VOLUME_GROUP, &opts.id, None).await?;
        if !self.state.lock().groups.contains(&opts.id) {
            return Err(Error::driver("sample", OP_UPDATE_VOLUME_GROUP, "group not found"));
        }
        Ok(self.group_outcome(
            opts.add_volumes
                .iter()
                .chain(opts.remove_volumes.iter())
                .map(|v| v.id.clone()),
        ))
    }

    async fn delete_volume_group(
        &self,
        opts: &DeleteVolumeGroupOpts,
    ) -> Result<VolumeGroupOutcome> {
        self.enter(OP_DELETE_VOLUME_GROUP, &opts.id, None).await?;
        let outcome = self.group_outcome(opts.volumes.iter().map(|v| v.id.clone()));

        let mut state = self.state.lock();
        for snapshot in &opts.snapshots {
            if outcome.failure_for(&snapshot.volume_id).is_none() {
                state.snapshots.remove(&snapshot.id);
            }
        }
        for volume in &opts.volumes {
            if outcome.failure_for(&volume.id).is_none() {
                state.volumes.remove(&volume.id);
            }
        }
        if outcome.volumes.is_empty() {
            state.groups.remove(&opts.id);
        }
        Ok(outcome)
    }

    async fn list_pools(&self) -> Result<Vec<PoolSpec>> {
        self.enter(OP_LIST_POOLS, &self.backend, None).await?;
        let state = self.state.lock();
        Ok(state
            .pools
            .iter()
            .map(|p| {
                let mut pool = p.clone();
                pool.free_capacity = state.free(&p.name).unwrap_or(0);
                pool
            })
            .collect())
    }
}

fn volume_result(pool: &str, id: &str) -> VolumeResult {
    let mut metadata = BTreeMap::new();
    metadata.insert("lvPath".to_string(), format!("/dev/{}/volume-{}", pool, id));
    VolumeResult { metadata }
}

#[async_trait]
impl ReplicationDriver for SampleDriver {
    fn name(&self) -> &str {
        super::SAMPLE_DRIVER
    }

    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn unset(&self) -> Result<()> {
        Ok(())
    }

    async fn create_replication(&self, opts: &ReplicationOpts) -> Result<ReplicationResult> {
        self.enter(OP_CREATE_REPLICATION, &opts.id, Some(opts.is_primary))
            .await?;
        self.state
            .lock()
            .replications
            .insert((opts.id.clone(), opts.is_primary));

        let mut result = ReplicationResult::default();
        if opts.is_primary {
            result.primary_replication_driver_data.insert(
                "replicationPath".into(),
                format!("/replication/{}/primary", opts.id),
            );
        } else {
            result.secondary_replication_driver_data.insert(
                "replicationPath".into(),
                format!("/replication/{}/secondary", opts.id),
            );
        }
        Ok(result)
    }

    async fn delete_replication(&self, opts: &ReplicationOpts) -> Result<()> {
        self.enter(OP_DELETE_REPLICATION, &opts.id, Some(opts.is_primary))
            .await?;
        self.state
            .lock()
            .replications
            .remove(&(opts.id.clone(), opts.is_primary));
        Ok(())
    }

    async fn enable_replication(&self, opts: &ReplicationOpts) -> Result<()> {
        self.enter(OP_ENABLE_REPLICATION, &opts.id, Some(opts.is_primary))
            .await
    }

    async fn disable_replication(&self, opts: &ReplicationOpts) -> Result<()> {
        self.enter(OP_DISABLE_REPLICATION, &opts.id, Some(opts.is_primary))
            .await
    }

    async fn failover_replication(
        &self,
        opts: &ReplicationOpts,
        _failover: &FailoverOpts,
    ) -> Result<()> {
        self.enter(OP_FAILOVER_REPLICATION, &opts.id, Some(opts.is_primary))
            .await
    }
}

#[async_trait]
impl MetricsDriver for SampleDriver {
    fn name(&self) -> &str {
        super::SAMPLE_DRIVER
    }

    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn unset(&self) -> Result<()> {
        Ok(())
    }

    async fn supported_metrics(&self) -> Result<Vec<String>> {
        Ok(SUPPORTED_METRICS.iter().map(|m| m.to_string()).collect())
    }

    async fn collect_metrics(&self, opts: &CollectMetricsOpts) -> Result<Vec<MetricSample>> {
        self.enter(OP_COLLECT_METRICS, &opts.instance_id, None).await?;
        let state = self.state.lock();

        let capacity_used = match state.volumes.get(&opts.instance_id) {
            Some((_, size)) => *size,
            None => state.used(&opts.instance_id),
        };
        let connections = state
            .connections
            .values()
            .filter(|v| **v == opts.instance_id)
            .count();

        let now = Utc::now();
        let wanted = |name: &str| {
            opts.metric_names.is_empty() || opts.metric_names.iter().any(|m| m == name)
        };
        let mut samples = Vec::new();
        for (name, unit, value) in [
            ("capacityUsed", "GiB", capacity_used as f64),
            ("connections", "count", connections as f64),
            ("iops", "ops/s", 0.0),
        ] {
            if wanted(name) {
                samples.push(MetricSample {
                    instance_id: opts.instance_id.clone(),
                    name: name.to_string(),
                    unit: unit.to_string(),
                    value,
                    timestamp: now,
                    labels: BTreeMap::from([("backend".to_string(), self.backend.clone())]),
                });
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn driver() -> SampleDriver {
        SampleDriver::from_config(&BackendConfig {
            name: "b1".into(),
            driver_name: "sample".into(),
            availability_zone: "east".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn create(id: &str, size: u64) -> CreateVolumeOpts {
        CreateVolumeOpts {
            id: id.into(),
            pool_name: "b1-pool".into(),
            size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_default_pool_tracks_capacity() {
        let d = driver();
        d.create_volume(&create("v1", 30)).await.unwrap();
        // Repeated create with the same id is a no-op
        d.create_volume(&create("v1", 30)).await.unwrap();

        let pools = d.list_pools().await.unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].availability_zone, "east");
        assert_eq!(pools[0].free_capacity, 70);

        let err = d.create_volume(&create("v2", 71)).await.unwrap_err();
        assert_matches!(err, Error::DriverFailed { .. });
    }

    #[tokio::test]
    async fn test_side_fault_hits_one_side() {
        let d = driver();
        d.inject(Fault::FailSide {
            operation: OP_CREATE_REPLICATION,
            primary: false,
        });

        let mut opts = ReplicationOpts {
            id: "r1".into(),
            is_primary: true,
            ..Default::default()
        };
        assert!(d.create_replication(&opts).await.is_ok());
        opts.is_primary = false;
        assert!(d.create_replication(&opts).await.is_err());

        let calls = d.calls(OP_CREATE_REPLICATION);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].primary, Some(true));
    }

    #[tokio::test]
    async fn test_setup_failures_count_down() {
        let d = driver();
        d.fail_setup(2);
        assert!(VolumeDriver::setup(&d).await.is_err());
        assert!(VolumeDriver::setup(&d).await.is_err());
        assert!(VolumeDriver::setup(&d).await.is_ok());
    }

    #[tokio::test]
    async fn test_group_member_fault() {
        let d = driver();
        d.inject(Fault::GroupMember("v2".into()));
        d.create_volume_group(&CreateVolumeGroupOpts {
            id: "g1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let outcome = d
            .update_volume_group(&UpdateVolumeGroupOpts {
                id: "g1".into(),
                add_volumes: vec![
                    crate::domain::ports::VolumeRef {
                        id: "v1".into(),
                        ..Default::default()
                    },
                    crate::domain::ports::VolumeRef {
                        id: "v2".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.failure_for("v1"), None);
        assert!(outcome.failure_for("v2").is_some());
    }

    #[tokio::test]
    async fn test_collect_metrics_filters_names() {
        let d = driver();
        d.create_volume(&create("v1", 3)).await.unwrap();
        let samples = d
            .collect_metrics(&CollectMetricsOpts {
                instance_id: "v1".into(),
                metric_names: vec!["capacityUsed".into()],
            })
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 3.0);
    }
}
