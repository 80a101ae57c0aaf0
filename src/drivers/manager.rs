//! Driver Manager
//!
//! Owns one [`BackendHandle`] per enabled backend. Each handle carries up to
//! three driver slots (provision, replication, metrics) with an atomic ready
//! flag. Setup runs in its own task per slot and is retried with capped
//! exponential backoff; callers asking for an un-ready slot get
//! [`Error::InitializationPending`].
//!
//! When a provisioning driver becomes ready its pools are listed and written
//! to the metadata store together with the backend's dock record.

use super::DriverRegistry;
use crate::config::{BackendConfig, Config};
use crate::domain::model::{BaseModel, Dock, Pool};
use crate::domain::ports::{
    DriverRole, ListFilter, MetadataStoreRef, MetricsDriver, PoolSpec, ReplicationDriver,
    VolumeDriver,
};
use crate::error::{Error, Result};
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

// =============================================================================
// Driver Slots
// =============================================================================

/// One driver instance and its readiness
pub struct DriverSlot<D: ?Sized> {
    driver: Arc<D>,
    ready: AtomicBool,
    /// Present when calls into this instance are serialized
    serial: Option<Arc<Mutex<()>>>,
}

impl<D: ?Sized> DriverSlot<D> {
    fn new(driver: Arc<D>, serialize: bool) -> Self {
        Self {
            driver,
            ready: AtomicBool::new(false),
            serial: serialize.then(|| Arc::new(Mutex::new(()))),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    async fn lease(&self) -> DriverLease<D> {
        let guard = match &self.serial {
            Some(lock) => Some(lock.clone().lock_owned().await),
            None => None,
        };
        DriverLease {
            driver: self.driver.clone(),
            _guard: guard,
        }
    }
}

/// Access to a ready driver; holds the instance lock while alive
pub struct DriverLease<D: ?Sized> {
    driver: Arc<D>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl<D: ?Sized> Deref for DriverLease<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.driver
    }
}

// =============================================================================
// Backend Handle
// =============================================================================

/// Drivers serving one configured backend
pub struct BackendHandle {
    pub config: BackendConfig,
    pub dock_id: String,
    provision: DriverSlot<dyn VolumeDriver>,
    replication: Option<DriverSlot<dyn ReplicationDriver>>,
    metrics: Option<DriverSlot<dyn MetricsDriver>>,
}

impl BackendHandle {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Every configured role has finished setup
    pub fn is_ready(&self) -> bool {
        self.provision.is_ready()
            && self.replication.as_ref().map_or(true, |s| s.is_ready())
            && self.metrics.as_ref().map_or(true, |s| s.is_ready())
    }

    pub fn role_ready(&self, role: DriverRole) -> bool {
        match role {
            DriverRole::Provision => self.provision.is_ready(),
            DriverRole::Replication => self.replication.as_ref().map_or(false, |s| s.is_ready()),
            DriverRole::Metrics => self.metrics.as_ref().map_or(false, |s| s.is_ready()),
        }
    }

    fn pending(&self, role: DriverRole) -> Error {
        Error::InitializationPending {
            backend: self.config.name.clone(),
            role: role.to_string(),
        }
    }

    fn missing(&self, role: DriverRole) -> Error {
        Error::precondition(
            "backend",
            self.config.name.clone(),
            format!("no {} driver configured", role),
        )
    }
}

// =============================================================================
// Setup Policy
// =============================================================================

/// Backoff applied to driver setup
#[derive(Debug, Clone, Copy)]
pub struct SetupPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Give up after this long
    pub max_elapsed: Duration,
}

impl SetupPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            max_elapsed: config.setup_timeout(),
        }
    }
}

// =============================================================================
// Driver Manager
// =============================================================================

/// Per-backend driver instances and their readiness
pub struct DriverManager {
    config: Arc<Config>,
    store: MetadataStoreRef,
    backends: DashMap<String, Arc<BackendHandle>>,
    setup_policy: SetupPolicy,
}

impl DriverManager {
    /// Instantiate the drivers every enabled backend names.
    ///
    /// Fails if a backend names a driver the registry does not know.
    pub fn new(
        config: Arc<Config>,
        registry: &DriverRegistry,
        store: MetadataStoreRef,
    ) -> Result<Self> {
        let backends = DashMap::new();
        let serialize = config.serialize_driver_calls;

        for backend in config.enabled_backends() {
            let provision = registry.volume_driver(&backend.driver_name, &backend)?;
            let replication = match &backend.replication_driver_name {
                Some(name) => Some(DriverSlot::new(
                    registry.replication_driver(name, &backend)?,
                    serialize,
                )),
                None => None,
            };
            let metrics = match &backend.metrics_driver_name {
                Some(name) => Some(DriverSlot::new(
                    registry.metrics_driver(name, &backend)?,
                    serialize,
                )),
                None => None,
            };

            let handle = BackendHandle {
                dock_id: Dock::derive_id(&config.node_id, &backend.name),
                provision: DriverSlot::new(provision, serialize),
                replication,
                metrics,
                config: backend.clone(),
            };
            info!(
                "Backend {} registered (driver {}, dock {})",
                backend.name, backend.driver_name, handle.dock_id
            );
            backends.insert(backend.name.clone(), Arc::new(handle));
        }

        let setup_policy = SetupPolicy::from_config(&config);
        Ok(Self {
            config,
            store,
            backends,
            setup_policy,
        })
    }

    /// Override the setup backoff
    pub fn with_setup_policy(mut self, policy: SetupPolicy) -> Self {
        self.setup_policy = policy;
        self
    }

    pub fn store(&self) -> &MetadataStoreRef {
        &self.store
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Register docks and spawn one setup task per driver slot.
    ///
    /// The returned handles complete when each slot is ready or setup gave up.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let mut tasks = Vec::new();

        for handle in self.handles() {
            self.register_dock(&handle).await?;

            let manager = self.clone();
            let backend = handle.clone();
            tasks.push(tokio::spawn(async move {
                let driver = backend.provision.driver.clone();
                let result = manager
                    .retry_setup(backend.name(), DriverRole::Provision, || {
                        let driver = driver.clone();
                        async move { driver.setup().await }
                    })
                    .await;
                if result.is_ok() {
                    backend.provision.mark_ready();
                    info!("Backend {} provision driver ready", backend.name());
                    if let Err(e) = manager.refresh_pools(backend.name()).await {
                        warn!("Initial pool sync for {} failed: {}", backend.name(), e);
                    }
                }
            }));

            if let Some(slot) = &handle.replication {
                let manager = self.clone();
                let backend = handle.clone();
                let driver = slot.driver.clone();
                tasks.push(tokio::spawn(async move {
                    let result = manager
                        .retry_setup(backend.name(), DriverRole::Replication, || {
                            let driver = driver.clone();
                            async move { driver.setup().await }
                        })
                        .await;
                    if let (Ok(()), Some(slot)) = (result, &backend.replication) {
                        slot.mark_ready();
                        info!("Backend {} replication driver ready", backend.name());
                    }
                }));
            }

            if let Some(slot) = &handle.metrics {
                let manager = self.clone();
                let backend = handle.clone();
                let driver = slot.driver.clone();
                tasks.push(tokio::spawn(async move {
                    let result = manager
                        .retry_setup(backend.name(), DriverRole::Metrics, || {
                            let driver = driver.clone();
                            async move { driver.setup().await }
                        })
                        .await;
                    if let (Ok(()), Some(slot)) = (result, &backend.metrics) {
                        slot.mark_ready();
                        info!("Backend {} metrics driver ready", backend.name());
                    }
                }));
            }
        }

        Ok(tasks)
    }

    async fn retry_setup<F, Fut>(&self, backend: &str, role: DriverRole, mut attempt: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.setup_policy.initial_interval)
            .with_max_interval(self.setup_policy.max_interval)
            .with_max_elapsed_time(Some(self.setup_policy.max_elapsed))
            .build();

        let result = backoff::future::retry(policy, || {
            let fut = attempt();
            async move {
                fut.await.map_err(|e| {
                    warn!("Setup of {} {} driver failed, retrying: {}", backend, role, e);
                    backoff::Error::transient(e)
                })
            }
        })
        .await;

        if let Err(e) = &result {
            error!("Giving up on {} {} driver setup: {}", backend, role, e);
        }
        result
    }

    async fn register_dock(&self, handle: &BackendHandle) -> Result<()> {
        let backend = &handle.config;
        let dock = Dock {
            base: BaseModel::new(Some(handle.dock_id.clone()), "", ""),
            name: backend.name.clone(),
            description: backend.description.clone(),
            node_id: self.config.node_id.clone(),
            endpoint: backend
                .endpoint
                .clone()
                .unwrap_or_else(|| self.config.api_endpoint.clone()),
            driver_name: backend.driver_name.clone(),
            backend_name: backend.name.clone(),
            storage_type: backend.storage_type,
            metadata: backend.host.clone(),
        };

        let docks = self.store.docks();
        if docks.get(&dock.base.id).await?.is_some() {
            docks
                .update(
                    &handle.dock_id,
                    Box::new(move |stored: &mut Dock| {
                        let base = stored.base.clone();
                        *stored = dock;
                        stored.base = base;
                        Ok(())
                    }),
                )
                .await?;
        } else {
            docks.create(dock).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// List the backend's pools and write them to the store.
    ///
    /// On failure the backend's known pools are kept but flagged stale.
    pub async fn refresh_pools(&self, backend: &str) -> Result<Vec<Pool>> {
        let handle = self.handle(backend)?;
        let listed = {
            let driver = self.volume_driver(backend).await?;
            driver.list_pools().await
        };

        let specs = match listed {
            Ok(specs) => specs,
            Err(e) => {
                warn!("Listing pools of {} failed, marking them stale: {}", backend, e);
                self.mark_stale(&handle.dock_id, &[]).await?;
                return Err(e);
            }
        };

        let mut pools = Vec::with_capacity(specs.len());
        for spec in &specs {
            pools.push(self.upsert_pool(&handle, spec).await?);
        }
        let live: Vec<String> = pools.iter().map(|p| p.base.id.clone()).collect();
        self.mark_stale(&handle.dock_id, &live).await?;

        info!("Synced {} pools from backend {}", pools.len(), backend);
        Ok(pools)
    }

    async fn upsert_pool(&self, handle: &BackendHandle, spec: &PoolSpec) -> Result<Pool> {
        let id = Pool::derive_id(&handle.dock_id, &spec.name);
        let availability_zone = if spec.availability_zone.is_empty() {
            handle.config.availability_zone.clone()
        } else {
            spec.availability_zone.clone()
        };
        let pool = Pool {
            base: BaseModel::new(Some(id.clone()), "", ""),
            name: spec.name.clone(),
            description: spec.description.clone(),
            dock_id: handle.dock_id.clone(),
            backend_name: handle.config.name.clone(),
            total_capacity: spec.total_capacity,
            free_capacity: spec.free_capacity,
            storage_type: spec.storage_type,
            availability_zone,
            access_protocols: spec.access_protocols.clone(),
            replication_type: spec.replication_type,
            multi_attach: spec.multi_attach,
            extras: spec.extras.clone(),
            stale: false,
        };

        let pools = self.store.pools();
        if pools.get(&id).await?.is_some() {
            pools
                .update(
                    &id,
                    Box::new(move |stored: &mut Pool| {
                        let base = stored.base.clone();
                        *stored = pool;
                        stored.base = base;
                        Ok(())
                    }),
                )
                .await
        } else {
            pools.create(pool).await
        }
    }

    /// Flag every pool of the dock not in `live` as stale
    async fn mark_stale(&self, dock_id: &str, live: &[String]) -> Result<()> {
        let filter = ListFilter::new().field("dockId", dock_id);
        for pool in self.store.pools().list(&filter).await? {
            if pool.stale || live.contains(&pool.base.id) {
                continue;
            }
            self.store
                .pools()
                .update(
                    &pool.base.id,
                    Box::new(|p: &mut Pool| {
                        p.stale = true;
                        Ok(())
                    }),
                )
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Driver Access
    // =========================================================================

    pub fn handle(&self, backend: &str) -> Result<Arc<BackendHandle>> {
        self.backends
            .get(backend)
            .map(|h| h.value().clone())
            .ok_or_else(|| Error::BackendNotFound {
                backend: backend.to_string(),
            })
    }

    pub fn handles(&self) -> Vec<Arc<BackendHandle>> {
        let mut handles: Vec<_> = self.backends.iter().map(|h| h.value().clone()).collect();
        handles.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        handles
    }

    /// Every backend has finished setup of every role
    pub fn all_ready(&self) -> bool {
        self.backends.iter().all(|h| h.is_ready())
    }

    pub async fn volume_driver(&self, backend: &str) -> Result<DriverLease<dyn VolumeDriver>> {
        let handle = self.handle(backend)?;
        if !handle.provision.is_ready() {
            return Err(handle.pending(DriverRole::Provision));
        }
        Ok(handle.provision.lease().await)
    }

    pub async fn replication_driver(
        &self,
        backend: &str,
    ) -> Result<DriverLease<dyn ReplicationDriver>> {
        let handle = self.handle(backend)?;
        let slot = handle
            .replication
            .as_ref()
            .ok_or_else(|| handle.missing(DriverRole::Replication))?;
        if !slot.is_ready() {
            return Err(handle.pending(DriverRole::Replication));
        }
        Ok(slot.lease().await)
    }

    pub async fn metrics_driver(&self, backend: &str) -> Result<DriverLease<dyn MetricsDriver>> {
        let handle = self.handle(backend)?;
        let slot = handle
            .metrics
            .as_ref()
            .ok_or_else(|| handle.missing(DriverRole::Metrics))?;
        if !slot.is_ready() {
            return Err(handle.pending(DriverRole::Metrics));
        }
        Ok(slot.lease().await)
    }

    /// Release every ready driver
    pub async fn shutdown(&self) {
        for handle in self.handles() {
            if handle.provision.is_ready() {
                if let Err(e) = handle.provision.driver.unset().await {
                    warn!("Unset of {} provision driver failed: {}", handle.name(), e);
                }
            }
            if let Some(slot) = handle.replication.as_ref().filter(|s| s.is_ready()) {
                if let Err(e) = slot.driver.unset().await {
                    warn!("Unset of {} replication driver failed: {}", handle.name(), e);
                }
            }
            if let Some(slot) = handle.metrics.as_ref().filter(|s| s.is_ready()) {
                if let Err(e) = slot.driver.unset().await {
                    warn!("Unset of {} metrics driver failed: {}", handle.name(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sample::{Fault, SampleDriver, OP_LIST_POOLS};
    use crate::domain::ports::{MetricsDriverRef, ReplicationDriverRef, VolumeDriverRef};
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use crate::domain::model::StorageType;

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.backends.enabled = "b1".into();
        config.backends.entries.insert(
            "b1".into(),
            BackendConfig {
                name: "b1".into(),
                driver_name: "test".into(),
                replication_driver_name: Some("test".into()),
                metrics_driver_name: Some("test".into()),
                availability_zone: "east".into(),
                ..Default::default()
            },
        );
        Arc::new(config)
    }

    fn fast() -> SetupPolicy {
        SetupPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
        }
    }

    fn registry(driver: Arc<SampleDriver>) -> DriverRegistry {
        let registry = DriverRegistry::new();
        let d = driver.clone();
        registry.register_volume_driver(
            StorageType::Block,
            "test",
            Arc::new(move |_: &BackendConfig| Ok(d.clone() as VolumeDriverRef)),
        );
        let d = driver.clone();
        registry.register_replication_driver(
            StorageType::Block,
            "test",
            Arc::new(move |_: &BackendConfig| Ok(d.clone() as ReplicationDriverRef)),
        );
        registry.register_metrics_driver(
            StorageType::Block,
            "test",
            Arc::new(move |_: &BackendConfig| Ok(driver.clone() as MetricsDriverRef)),
        );
        registry
    }

    async fn started(driver: Arc<SampleDriver>) -> (Arc<DriverManager>, MetadataStoreRef) {
        let store: MetadataStoreRef = Arc::new(MemoryStore::new());
        let manager = Arc::new(
            DriverManager::new(config(), &registry(driver), store.clone())
                .unwrap()
                .with_setup_policy(fast()),
        );
        for task in manager.start().await.unwrap() {
            task.await.unwrap();
        }
        (manager, store)
    }

    #[tokio::test]
    async fn test_setup_retries_until_ready() {
        let driver = Arc::new(SampleDriver::new("b1", vec![]));
        driver.fail_setup(3);

        let (manager, _) = started(driver.clone()).await;
        assert!(manager.all_ready());
        assert!(manager.volume_driver("b1").await.is_ok());
        assert!(manager.metrics_driver("b1").await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_before_setup() {
        let store: MetadataStoreRef = Arc::new(MemoryStore::new());
        let driver = Arc::new(SampleDriver::new("b1", vec![]));
        let manager = DriverManager::new(config(), &registry(driver), store).unwrap();

        let err = manager.volume_driver("b1").await.err().unwrap();
        assert_matches!(err, Error::InitializationPending { .. });
        let err = manager.volume_driver("nope").await.err().unwrap();
        assert_matches!(err, Error::BackendNotFound { .. });
    }

    #[tokio::test]
    async fn test_readiness_syncs_pools_and_dock() {
        let driver = Arc::new(SampleDriver::new(
            "b1",
            vec![PoolSpec {
                name: "fast".into(),
                total_capacity: 10,
                free_capacity: 10,
                ..Default::default()
            }],
        ));
        let (manager, store) = started(driver).await;

        let handle = manager.handle("b1").unwrap();
        let dock = store.docks().must_get(&handle.dock_id).await.unwrap();
        assert_eq!(dock.backend_name, "b1");

        let pools = store.pools().list(&ListFilter::new()).await.unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].base.id, Pool::derive_id(&handle.dock_id, "fast"));
        assert_eq!(pools[0].availability_zone, "east");
        assert!(!pools[0].stale);
    }

    #[tokio::test]
    async fn test_failed_refresh_marks_pools_stale() {
        let driver = Arc::new(SampleDriver::new(
            "b1",
            vec![PoolSpec {
                name: "fast".into(),
                total_capacity: 10,
                free_capacity: 10,
                ..Default::default()
            }],
        ));
        let (manager, store) = started(driver.clone()).await;

        driver.inject(Fault::Fail(OP_LIST_POOLS));
        assert!(manager.refresh_pools("b1").await.is_err());

        let pools = store.pools().list(&ListFilter::new()).await.unwrap();
        assert!(pools[0].stale);
        assert_eq!(pools[0].free_capacity, 10);
    }

    #[tokio::test]
    async fn test_serialized_lease_blocks_second_caller() {
        let driver = Arc::new(SampleDriver::new("b1", vec![]));
        let (manager, _) = started(driver).await;

        let lease = manager.volume_driver("b1").await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(20), manager.volume_driver("b1")).await;
        assert!(second.is_err());

        drop(lease);
        assert!(manager.volume_driver("b1").await.is_ok());
    }
}
