//! Pool/Dock Inventory
//!
//! Reads of the pool and dock records the driver manager maintains, pool
//! capacity bookkeeping, and the periodic refresh loop. The metadata store is
//! the single source of truth; nothing is cached here.

use crate::domain::model::{Dock, Pool};
use crate::domain::ports::{ListFilter, MetadataStoreRef};
use crate::drivers::DriverManager;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Inventory {
    store: MetadataStoreRef,
    manager: Arc<DriverManager>,
}

impl Inventory {
    pub fn new(store: MetadataStoreRef, manager: Arc<DriverManager>) -> Self {
        Self { store, manager }
    }

    pub async fn pool(&self, id: &str) -> Result<Pool> {
        self.store.pools().must_get(id).await
    }

    pub async fn pools(&self, filter: &ListFilter) -> Result<Vec<Pool>> {
        self.store.pools().list(filter).await
    }

    pub async fn dock(&self, id: &str) -> Result<Dock> {
        self.store.docks().must_get(id).await
    }

    pub async fn docks(&self, filter: &ListFilter) -> Result<Vec<Dock>> {
        self.store.docks().list(filter).await
    }

    /// Pool and the dock that owns it
    pub async fn pool_and_dock(&self, pool_id: &str) -> Result<(Pool, Dock)> {
        let pool = self.pool(pool_id).await?;
        let dock = self.dock(&pool.dock_id).await?;
        Ok((pool, dock))
    }

    /// Take `gib` out of a pool's free capacity
    pub async fn debit(&self, pool_id: &str, gib: u64) -> Result<Pool> {
        let id = pool_id.to_string();
        self.store
            .pools()
            .update(
                pool_id,
                Box::new(move |pool: &mut Pool| {
                    if pool.free_capacity < gib {
                        warn!(
                            "Pool {} overcommitted: debiting {} GiB from {} GiB free",
                            id, gib, pool.free_capacity
                        );
                    }
                    pool.free_capacity = pool.free_capacity.saturating_sub(gib);
                    Ok(())
                }),
            )
            .await
    }

    /// Return `gib` to a pool, bounded by its total capacity
    pub async fn credit(&self, pool_id: &str, gib: u64) -> Result<Pool> {
        self.store
            .pools()
            .update(
                pool_id,
                Box::new(move |pool: &mut Pool| {
                    pool.free_capacity = (pool.free_capacity + gib).min(pool.total_capacity);
                    Ok(())
                }),
            )
            .await
    }

    /// Fail unless the pool can hold `gib` more
    pub async fn ensure_capacity(&self, pool_id: &str, gib: u64) -> Result<Pool> {
        let pool = self.pool(pool_id).await?;
        if pool.free_capacity < gib {
            return Err(Error::InsufficientCapacity {
                pool: pool.name.clone(),
                requested: gib,
                available: pool.free_capacity,
            });
        }
        Ok(pool)
    }

    /// Re-list pools on every ready backend
    pub async fn refresh(&self) -> Result<usize> {
        let mut synced = 0;
        for handle in self.manager.handles() {
            if !handle.is_ready() {
                debug!("Skipping refresh of {}: not ready", handle.name());
                continue;
            }
            match self.manager.refresh_pools(handle.name()).await {
                Ok(pools) => synced += pools.len(),
                Err(e) => warn!("Pool refresh of {} failed: {}", handle.name(), e),
            }
        }
        Ok(synced)
    }

    /// Refresh on a fixed interval until shutdown
    pub fn spawn_refresh(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let inventory = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Ok(n) = inventory.refresh().await {
                            debug!("Inventory refresh synced {} pools", n);
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Inventory refresh stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::model::{BaseModel, StorageType};
    use crate::drivers::DriverRegistry;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;

    async fn inventory_with_pool(free: u64) -> Inventory {
        let store: MetadataStoreRef = Arc::new(MemoryStore::new());
        store
            .pools()
            .create(Pool {
                base: BaseModel::new(Some("p1".into()), "", ""),
                name: "poolA".into(),
                description: String::new(),
                dock_id: "d1".into(),
                backend_name: "b1".into(),
                total_capacity: 100,
                free_capacity: free,
                storage_type: StorageType::Block,
                availability_zone: "default".into(),
                access_protocols: vec![],
                replication_type: Default::default(),
                multi_attach: false,
                extras: Default::default(),
                stale: false,
            })
            .await
            .unwrap();
        let manager = DriverManager::new(
            Arc::new(Config::default()),
            &DriverRegistry::with_builtin(),
            store.clone(),
        )
        .unwrap();
        Inventory::new(store, Arc::new(manager))
    }

    #[tokio::test]
    async fn test_debit_and_credit() {
        let inventory = inventory_with_pool(100).await;
        assert_eq!(inventory.debit("p1", 1).await.unwrap().free_capacity, 99);
        assert_eq!(inventory.debit("p1", 4).await.unwrap().free_capacity, 95);
        assert_eq!(inventory.credit("p1", 50).await.unwrap().free_capacity, 100);
    }

    #[tokio::test]
    async fn test_ensure_capacity() {
        let inventory = inventory_with_pool(5).await;
        assert!(inventory.ensure_capacity("p1", 5).await.is_ok());
        assert_matches!(
            inventory.ensure_capacity("p1", 6).await,
            Err(Error::InsufficientCapacity { available: 5, .. })
        );
    }
}
