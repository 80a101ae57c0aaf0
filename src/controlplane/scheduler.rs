//! Scheduler
//!
//! Picks the pool a new volume or group lands on. Pools are read from the
//! metadata store on every call, so readiness and refreshes made by the
//! driver manager are observed immediately.
//!
//! Every filter must hold; among the survivors the pool with the most free
//! capacity wins, ties broken by pool name.

use crate::domain::model::{Dock, Pool, Profile};
use crate::domain::ports::{ListFilter, MetadataStoreRef};
use crate::error::{Error, Result};
use std::cmp::Reverse;
use tracing::debug;

/// What a placement must satisfy
#[derive(Debug, Clone)]
pub struct PlacementRequest<'a> {
    pub profile: &'a Profile,
    /// GiB
    pub size: u64,
    /// `None` accepts any zone
    pub availability_zone: Option<String>,
    /// Restrict to one pool (clone source, group pool, or profile pin)
    pub pool_hint: Option<String>,
    pub multi_attach: bool,
    pub consistency_group: bool,
}

/// The chosen pool, its dock and the backend whose drivers serve it
#[derive(Debug, Clone)]
pub struct Placement {
    pub pool: Pool,
    pub dock: Dock,
}

impl Placement {
    pub fn backend(&self) -> &str {
        &self.pool.backend_name
    }
}

pub struct Scheduler {
    store: MetadataStoreRef,
}

impl Scheduler {
    pub fn new(store: MetadataStoreRef) -> Self {
        Self { store }
    }

    pub async fn select(&self, request: &PlacementRequest<'_>) -> Result<Placement> {
        let pools = self.store.pools().list(&ListFilter::new()).await?;
        let considered = pools.len();

        let mut rejections = Vec::new();
        let mut eligible: Vec<Pool> = pools
            .into_iter()
            .filter(|pool| match reject_reason(pool, request) {
                Some(reason) => {
                    rejections.push(format!("{}: {}", pool.name, reason));
                    false
                }
                None => true,
            })
            .collect();

        eligible.sort_by(|a, b| {
            Reverse(a.free_capacity)
                .cmp(&Reverse(b.free_capacity))
                .then_with(|| a.name.cmp(&b.name))
        });

        for pool in eligible {
            match self.store.docks().get(&pool.dock_id).await? {
                Some(dock) => {
                    debug!(
                        "Scheduled {} GiB onto pool {} ({} GiB free)",
                        request.size, pool.name, pool.free_capacity
                    );
                    return Ok(Placement { pool, dock });
                }
                None => rejections.push(format!("{}: dock {} unknown", pool.name, pool.dock_id)),
            }
        }

        Err(Error::NoEligiblePool {
            reason: format!(
                "{} GiB with profile {}: {} pools considered [{}]",
                request.size,
                request.profile.name,
                considered,
                rejections.join("; ")
            ),
        })
    }
}

/// Why a pool cannot take the request, or `None` if it can
fn reject_reason(pool: &Pool, request: &PlacementRequest<'_>) -> Option<String> {
    let properties = &request.profile.properties;

    let hint = request
        .pool_hint
        .as_deref()
        .or(properties.pool_id.as_deref());
    if let Some(hint) = hint {
        if pool.base.id != hint {
            return Some("not the requested pool".into());
        }
    }
    if pool.stale {
        return Some("stale".into());
    }
    if pool.free_capacity < request.size {
        return Some(format!("{} GiB free", pool.free_capacity));
    }
    if let Some(az) = request.availability_zone.as_deref() {
        if !az.is_empty() && pool.availability_zone != az {
            return Some(format!("zone {}", pool.availability_zone));
        }
    }
    if pool.storage_type != request.profile.storage_type {
        return Some(format!("storage type {}", pool.storage_type));
    }
    if let Some(protocol) = properties.access_protocol {
        if !pool.access_protocols.contains(&protocol) {
            return Some(format!("no {} access", protocol));
        }
    }
    if properties.requests_replication() && Some(pool.replication_type) != properties.replication_type
    {
        return Some(format!("replication {}", pool.replication_type));
    }
    if (request.multi_attach || properties.multi_attach) && !pool.multi_attach {
        return Some("no multi-attach".into());
    }
    if request.consistency_group && !pool.supports_consistency_groups() {
        return Some("no consistency groups".into());
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::model::{
        AccessProtocol, BaseModel, ProfileProperties, ReplicationType, StorageType,
    };
    use crate::domain::ports::MetadataStore;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    pub fn pool(id: &str, name: &str, free: u64, az: &str) -> Pool {
        Pool {
            base: BaseModel::new(Some(id.into()), "", ""),
            name: name.into(),
            description: String::new(),
            dock_id: "d1".into(),
            backend_name: "b1".into(),
            total_capacity: free.max(100),
            free_capacity: free,
            storage_type: StorageType::Block,
            availability_zone: az.into(),
            access_protocols: vec![AccessProtocol::Iscsi],
            replication_type: ReplicationType::None,
            multi_attach: false,
            extras: Default::default(),
            stale: false,
        }
    }

    pub fn profile(properties: ProfileProperties) -> Profile {
        Profile {
            base: BaseModel::new(Some("gold".into()), "", ""),
            name: "gold".into(),
            description: String::new(),
            storage_type: StorageType::Block,
            properties,
        }
    }

    fn dock() -> Dock {
        Dock {
            base: BaseModel::new(Some("d1".into()), "", ""),
            name: "b1".into(),
            description: String::new(),
            node_id: "n1".into(),
            endpoint: "127.0.0.1:50050".into(),
            driver_name: "sample".into(),
            backend_name: "b1".into(),
            storage_type: StorageType::Block,
            metadata: Default::default(),
        }
    }

    async fn scheduler(pools: Vec<Pool>) -> Scheduler {
        let store = Arc::new(MemoryStore::new());
        store.docks().create(dock()).await.unwrap();
        for p in pools {
            store.pools().create(p).await.unwrap();
        }
        Scheduler::new(store)
    }

    fn request(profile: &Profile, size: u64) -> PlacementRequest<'_> {
        PlacementRequest {
            profile,
            size,
            availability_zone: None,
            pool_hint: None,
            multi_attach: false,
            consistency_group: false,
        }
    }

    #[tokio::test]
    async fn test_most_free_capacity_wins() {
        let s = scheduler(vec![pool("pA", "pA", 5, "east"), pool("pB", "pB", 50, "east")]).await;
        let gold = profile(Default::default());

        let placement = s.select(&request(&gold, 10)).await.unwrap();
        assert_eq!(placement.pool.name, "pB");
        assert_eq!(placement.backend(), "b1");
    }

    #[tokio::test]
    async fn test_tie_break_by_name() {
        let s = scheduler(vec![pool("p2", "zeta", 50, "east"), pool("p1", "alpha", 50, "east")]).await;
        let gold = profile(Default::default());
        assert_eq!(s.select(&request(&gold, 1)).await.unwrap().pool.name, "alpha");
    }

    #[tokio::test]
    async fn test_filters() {
        let mut replicated = pool("p3", "rep", 20, "west");
        replicated.replication_type = ReplicationType::Array;
        let s = scheduler(vec![pool("p1", "east", 50, "east"), replicated]).await;

        let gold = profile(ProfileProperties {
            replication_type: Some(ReplicationType::Array),
            ..Default::default()
        });
        assert_eq!(s.select(&request(&gold, 1)).await.unwrap().pool.name, "rep");

        let mut req = request(&gold, 1);
        req.availability_zone = Some("east".into());
        assert_matches!(s.select(&req).await, Err(Error::NoEligiblePool { .. }));

        let nfs = profile(ProfileProperties {
            access_protocol: Some(AccessProtocol::Nfs),
            ..Default::default()
        });
        assert_matches!(s.select(&request(&nfs, 1)).await, Err(Error::NoEligiblePool { .. }));
    }

    #[tokio::test]
    async fn test_pool_hint_and_stale_pools() {
        let mut stale = pool("p2", "stale", 90, "east");
        stale.stale = true;
        let s = scheduler(vec![pool("p1", "small", 10, "east"), stale]).await;
        let gold = profile(Default::default());

        assert_eq!(s.select(&request(&gold, 1)).await.unwrap().pool.name, "small");

        let mut req = request(&gold, 1);
        req.pool_hint = Some("p2".into());
        let err = s.select(&req).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
