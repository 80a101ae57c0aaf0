//! Driver Registry
//!
//! Factories for driver implementations keyed by storage type, driver role and
//! driver name. Compiled-in drivers are registered by
//! [`DriverRegistry::with_builtin`]; additional factories can be registered at
//! startup before the [`DriverManager`](manager::DriverManager) starts.

pub mod manager;
pub mod sample;

pub use manager::{BackendHandle, DriverLease, DriverManager};
pub use sample::{Call, Fault, SampleDriver};

use crate::config::BackendConfig;
use crate::domain::model::StorageType;
use crate::domain::ports::{DriverRole, MetricsDriverRef, ReplicationDriverRef, VolumeDriverRef};
use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a provisioning driver for one backend
pub type VolumeDriverFactory =
    Arc<dyn Fn(&BackendConfig) -> Result<VolumeDriverRef> + Send + Sync>;

/// Builds a replication driver for one backend
pub type ReplicationDriverFactory =
    Arc<dyn Fn(&BackendConfig) -> Result<ReplicationDriverRef> + Send + Sync>;

/// Builds a metrics driver for one backend
pub type MetricsDriverFactory =
    Arc<dyn Fn(&BackendConfig) -> Result<MetricsDriverRef> + Send + Sync>;

#[derive(Clone)]
enum Factory {
    Provision(VolumeDriverFactory),
    Replication(ReplicationDriverFactory),
    Metrics(MetricsDriverFactory),
}

impl Factory {
    fn role(&self) -> DriverRole {
        match self {
            Factory::Provision(_) => DriverRole::Provision,
            Factory::Replication(_) => DriverRole::Replication,
            Factory::Metrics(_) => DriverRole::Metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DriverKey {
    storage_type: StorageType,
    role: DriverRole,
    name: String,
}

/// Name of the compiled-in reference driver
pub const SAMPLE_DRIVER: &str = "sample";

// =============================================================================
// Driver Registry
// =============================================================================

/// Keyed lookup of driver factories
#[derive(Default)]
pub struct DriverRegistry {
    factories: RwLock<HashMap<DriverKey, Factory>>,
}

impl DriverRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every compiled-in driver.
    ///
    /// The sample driver's roles share one instance per backend so metrics
    /// observe the volumes the provisioning role created.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        let samples: Arc<DashMap<String, Arc<SampleDriver>>> = Arc::new(DashMap::new());

        for storage_type in [StorageType::Block, StorageType::File] {
            let shared = samples.clone();
            registry.register_volume_driver(
                storage_type,
                SAMPLE_DRIVER,
                Arc::new(move |config: &BackendConfig| {
                    Ok(shared_sample(&shared, config)? as VolumeDriverRef)
                }),
            );
            let shared = samples.clone();
            registry.register_replication_driver(
                storage_type,
                SAMPLE_DRIVER,
                Arc::new(move |config: &BackendConfig| {
                    Ok(shared_sample(&shared, config)? as ReplicationDriverRef)
                }),
            );
            let shared = samples.clone();
            registry.register_metrics_driver(
                storage_type,
                SAMPLE_DRIVER,
                Arc::new(move |config: &BackendConfig| {
                    Ok(shared_sample(&shared, config)? as MetricsDriverRef)
                }),
            );
        }
        registry
    }

    pub fn register_volume_driver(
        &self,
        storage_type: StorageType,
        name: &str,
        factory: VolumeDriverFactory,
    ) {
        self.insert(storage_type, name, Factory::Provision(factory));
    }

    pub fn register_replication_driver(
        &self,
        storage_type: StorageType,
        name: &str,
        factory: ReplicationDriverFactory,
    ) {
        self.insert(storage_type, name, Factory::Replication(factory));
    }

    pub fn register_metrics_driver(
        &self,
        storage_type: StorageType,
        name: &str,
        factory: MetricsDriverFactory,
    ) {
        self.insert(storage_type, name, Factory::Metrics(factory));
    }

    fn insert(&self, storage_type: StorageType, name: &str, factory: Factory) {
        let key = DriverKey {
            storage_type,
            role: factory.role(),
            name: name.to_string(),
        };
        self.factories.write().insert(key, factory);
    }

    fn lookup(&self, storage_type: StorageType, role: DriverRole, name: &str) -> Result<Factory> {
        let key = DriverKey {
            storage_type,
            role,
            name: name.to_string(),
        };
        self.factories
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::DriverNotRegistered {
                name: name.to_string(),
                role: role.to_string(),
                storage_type: storage_type.to_string(),
            })
    }

    /// Instantiate the provisioning driver a backend names
    pub fn volume_driver(&self, name: &str, config: &BackendConfig) -> Result<VolumeDriverRef> {
        match self.lookup(config.storage_type, DriverRole::Provision, name)? {
            Factory::Provision(build) => build(config),
            _ => Err(Error::Internal(format!("factory for {} has the wrong role", name))),
        }
    }

    /// Instantiate the replication driver a backend names
    pub fn replication_driver(
        &self,
        name: &str,
        config: &BackendConfig,
    ) -> Result<ReplicationDriverRef> {
        match self.lookup(config.storage_type, DriverRole::Replication, name)? {
            Factory::Replication(build) => build(config),
            _ => Err(Error::Internal(format!("factory for {} has the wrong role", name))),
        }
    }

    /// Instantiate the metrics driver a backend names
    pub fn metrics_driver(&self, name: &str, config: &BackendConfig) -> Result<MetricsDriverRef> {
        match self.lookup(config.storage_type, DriverRole::Metrics, name)? {
            Factory::Metrics(build) => build(config),
            _ => Err(Error::Internal(format!("factory for {} has the wrong role", name))),
        }
    }

    /// Registered driver names for a role, sorted
    pub fn names(&self, role: DriverRole) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .keys()
            .filter(|k| k.role == role)
            .map(|k| k.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

fn shared_sample(
    instances: &DashMap<String, Arc<SampleDriver>>,
    config: &BackendConfig,
) -> Result<Arc<SampleDriver>> {
    let entry = instances
        .entry(config.name.clone())
        .or_try_insert_with(|| SampleDriver::from_config(config).map(Arc::new))?;
    Ok(entry.value().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn backend(storage_type: StorageType) -> BackendConfig {
        BackendConfig {
            name: "b1".into(),
            driver_name: SAMPLE_DRIVER.into(),
            storage_type,
            ..Default::default()
        }
    }

    #[test]
    fn test_builtin_sample_for_every_role() {
        let registry = DriverRegistry::with_builtin();
        let config = backend(StorageType::Block);

        assert_eq!(registry.volume_driver("sample", &config).unwrap().name(), "sample");
        assert_eq!(registry.replication_driver("sample", &config).unwrap().name(), "sample");
        assert_eq!(registry.metrics_driver("sample", &config).unwrap().name(), "sample");
        assert_eq!(registry.names(DriverRole::Metrics), vec!["sample"]);
    }

    #[test]
    fn test_unknown_driver() {
        let registry = DriverRegistry::with_builtin();
        let err = registry
            .volume_driver("lvm", &backend(StorageType::Block))
            .err()
            .unwrap();
        assert_matches!(err, Error::DriverNotRegistered { ref name, .. } if name == "lvm");
    }

    #[test]
    fn test_lookup_is_keyed_by_storage_type() {
        let registry = DriverRegistry::new();
        registry.register_volume_driver(
            StorageType::File,
            "nfs",
            Arc::new(|config: &BackendConfig| {
                Ok(Arc::new(SampleDriver::from_config(config)?) as VolumeDriverRef)
            }),
        );

        assert!(registry.volume_driver("nfs", &backend(StorageType::File)).is_ok());
        assert!(registry.volume_driver("nfs", &backend(StorageType::Block)).is_err());
    }
}
