//! Test harness: a control plane over two sample backends

use super::context::Context;
use super::controller::Controller;
use super::lifecycle::{
    CreateSnapshotRequest, CreateVolumeRequest, LifecycleEngine, DEFAULT_PROFILE_NAME,
};
use super::replication::ReplicationCoordinator;
use crate::config::{BackendConfig, Config};
use crate::domain::model::{
    AccessProtocol, BaseModel, Dock, Pool, Profile, ProfileProperties, ReplicationType, Snapshot,
    StorageType, Volume, POOL_EXTRA_CONSISTENCY_GROUP,
};
use crate::domain::ports::{
    MetadataStoreRef, MetricsDriverRef, PoolSpec, ReplicationDriverRef, VolumeDriverRef,
};
use crate::drivers::manager::SetupPolicy;
use crate::drivers::{DriverManager, DriverRegistry, SampleDriver};
use crate::error::Error;
use crate::metrics::Metrics;
use crate::store::MemoryStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

const TEST_DRIVER: &str = "harness";
pub const BACKENDS: [&str; 2] = ["b1", "b2"];
pub const TENANT: &str = "tenant-a";

pub struct Harness {
    pub config: Arc<Config>,
    pub store: MetadataStoreRef,
    pub manager: Arc<DriverManager>,
    pub controller: Arc<Controller>,
    pub engine: Arc<LifecycleEngine>,
    pub coordinator: Arc<ReplicationCoordinator>,
    pub drivers: HashMap<String, Arc<SampleDriver>>,
    /// The default block profile
    pub profile: Profile,
}

fn pool_spec(backend: &str, replication_type: ReplicationType) -> PoolSpec {
    let mut extras = BTreeMap::new();
    extras.insert(POOL_EXTRA_CONSISTENCY_GROUP.to_string(), "true".to_string());
    PoolSpec {
        name: format!("{}-pool", backend),
        description: String::new(),
        total_capacity: 100,
        free_capacity: 100,
        storage_type: StorageType::Block,
        availability_zone: "default".into(),
        access_protocols: vec![AccessProtocol::Iscsi],
        replication_type,
        multi_attach: true,
        extras,
    }
}

fn registry(drivers: &HashMap<String, Arc<SampleDriver>>) -> DriverRegistry {
    let registry = DriverRegistry::new();
    let lookup = Arc::new(drivers.clone());

    let by_name = lookup.clone();
    registry.register_volume_driver(
        StorageType::Block,
        TEST_DRIVER,
        Arc::new(move |config: &BackendConfig| {
            by_name
                .get(&config.name)
                .map(|d| d.clone() as VolumeDriverRef)
                .ok_or_else(|| Error::Configuration(format!("no test driver for {}", config.name)))
        }),
    );
    let by_name = lookup.clone();
    registry.register_replication_driver(
        StorageType::Block,
        TEST_DRIVER,
        Arc::new(move |config: &BackendConfig| {
            by_name
                .get(&config.name)
                .map(|d| d.clone() as ReplicationDriverRef)
                .ok_or_else(|| Error::Configuration(format!("no test driver for {}", config.name)))
        }),
    );
    registry.register_metrics_driver(
        StorageType::Block,
        TEST_DRIVER,
        Arc::new(move |config: &BackendConfig| {
            lookup
                .get(&config.name)
                .map(|d| d.clone() as MetricsDriverRef)
                .ok_or_else(|| Error::Configuration(format!("no test driver for {}", config.name)))
        }),
    );
    registry
}

fn config() -> Arc<Config> {
    let mut config = Config::default();
    config.backends.enabled = BACKENDS.join(",");
    for backend in BACKENDS {
        config.backends.entries.insert(
            backend.to_string(),
            BackendConfig {
                name: backend.to_string(),
                driver_name: TEST_DRIVER.into(),
                replication_driver_name: Some(TEST_DRIVER.into()),
                metrics_driver_name: Some(TEST_DRIVER.into()),
                availability_zone: "default".into(),
                ..Default::default()
            },
        );
    }
    Arc::new(config)
}

impl Harness {
    /// Both backends started, pools offering array replication
    pub async fn new() -> Self {
        Self::with_replication(ReplicationType::Array).await
    }

    pub async fn with_replication(replication_type: ReplicationType) -> Self {
        let h = Self::build(replication_type).await;
        for task in h.manager.start().await.unwrap() {
            task.await.unwrap();
        }
        assert!(h.manager.all_ready());
        h
    }

    /// Pools and docks on record but no driver set up yet
    pub async fn unstarted() -> Self {
        let h = Self::build(ReplicationType::Array).await;
        for backend in BACKENDS {
            let dock_id = Dock::derive_id(&h.config.node_id, backend);
            h.store
                .docks()
                .create(Dock {
                    base: BaseModel::new(Some(dock_id.clone()), "", ""),
                    name: backend.to_string(),
                    description: String::new(),
                    node_id: h.config.node_id.clone(),
                    endpoint: h.config.api_endpoint.clone(),
                    driver_name: TEST_DRIVER.into(),
                    backend_name: backend.to_string(),
                    storage_type: StorageType::Block,
                    metadata: BTreeMap::new(),
                })
                .await
                .unwrap();
            let spec = pool_spec(backend, ReplicationType::Array);
            h.store
                .pools()
                .create(Pool {
                    base: BaseModel::new(Some(Pool::derive_id(&dock_id, &spec.name)), "", ""),
                    name: spec.name,
                    description: spec.description,
                    dock_id,
                    backend_name: backend.to_string(),
                    total_capacity: spec.total_capacity,
                    free_capacity: spec.free_capacity,
                    storage_type: spec.storage_type,
                    availability_zone: spec.availability_zone,
                    access_protocols: spec.access_protocols,
                    replication_type: spec.replication_type,
                    multi_attach: spec.multi_attach,
                    extras: spec.extras,
                    stale: false,
                })
                .await
                .unwrap();
        }
        h
    }

    async fn build(replication_type: ReplicationType) -> Self {
        let drivers: HashMap<String, Arc<SampleDriver>> = BACKENDS
            .iter()
            .map(|b| {
                let driver = SampleDriver::new(b, vec![pool_spec(b, replication_type)]);
                (b.to_string(), Arc::new(driver))
            })
            .collect();

        let config = config();
        let store: MetadataStoreRef = Arc::new(MemoryStore::new());
        let manager = Arc::new(
            DriverManager::new(config.clone(), &registry(&drivers), store.clone())
                .unwrap()
                .with_setup_policy(SetupPolicy {
                    initial_interval: Duration::from_millis(1),
                    max_interval: Duration::from_millis(5),
                    max_elapsed: Duration::from_secs(5),
                }),
        );
        let metrics = Arc::new(Metrics::new().unwrap());
        let controller = Arc::new(Controller::new(config.clone(), manager.clone(), metrics));

        let profile = store
            .profiles()
            .create(Profile {
                base: BaseModel::new(None, "", ""),
                name: DEFAULT_PROFILE_NAME.into(),
                description: "default block profile".into(),
                storage_type: StorageType::Block,
                properties: ProfileProperties::default(),
            })
            .await
            .unwrap();

        Self {
            config,
            engine: controller.engine().clone(),
            coordinator: controller.replication().clone(),
            store,
            manager,
            controller,
            drivers,
            profile,
        }
    }

    /// A caller in the test tenant
    pub fn ctx(&self) -> Context {
        Context::new(TENANT, "user-a")
    }

    pub fn driver(&self, backend: &str) -> &Arc<SampleDriver> {
        &self.drivers[backend]
    }

    pub async fn pool(&self, id: &str) -> Pool {
        self.store.pools().must_get(id).await.unwrap()
    }

    /// Id of the single pool a backend exposes
    pub fn pool_id(&self, backend: &str) -> String {
        let dock_id = Dock::derive_id(&self.config.node_id, backend);
        Pool::derive_id(&dock_id, &format!("{}-pool", backend))
    }

    pub async fn backend_of(&self, volume: &Volume) -> String {
        self.pool(&volume.pool_id).await.backend_name
    }

    /// A file-storage profile, for mismatch checks
    pub async fn file_profile(&self) -> Profile {
        self.store
            .profiles()
            .create(Profile {
                base: BaseModel::new(None, "", ""),
                name: "files".into(),
                description: String::new(),
                storage_type: StorageType::File,
                properties: ProfileProperties::default(),
            })
            .await
            .unwrap()
    }

    /// Create a volume and wait for it to settle
    pub async fn volume(&self, ctx: &Context, name: &str, size: u64) -> Volume {
        let request = CreateVolumeRequest {
            name: name.into(),
            size,
            ..Default::default()
        };
        self.settled_volume(ctx, request).await
    }

    /// Create a volume on one backend and wait for it to settle
    pub async fn volume_on(&self, ctx: &Context, backend: &str, name: &str, size: u64) -> Volume {
        let request = CreateVolumeRequest {
            name: name.into(),
            size,
            pool_id: Some(self.pool_id(backend)),
            ..Default::default()
        };
        self.settled_volume(ctx, request).await
    }

    async fn settled_volume(&self, ctx: &Context, request: CreateVolumeRequest) -> Volume {
        let accepted = self.engine.create_volume(ctx, request).await.unwrap();
        let volume = accepted.join().await.unwrap();
        self.store.volumes().must_get(&volume.base.id).await.unwrap()
    }

    /// Snapshot a volume under a fixed id and wait for it to settle
    pub async fn snapshot(&self, ctx: &Context, volume_id: &str, id: &str) -> Snapshot {
        let request = CreateSnapshotRequest {
            id: Some(id.into()),
            name: id.into(),
            volume_id: volume_id.into(),
            ..Default::default()
        };
        let accepted = self.engine.create_snapshot(ctx, request).await.unwrap();
        accepted.join().await.unwrap();
        self.store.snapshots().must_get(id).await.unwrap()
    }
}
