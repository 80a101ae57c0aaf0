//! Volume create / extend / delete
//!
//! A volume record holds its size against its pool from the moment it is
//! accepted until it is removed; a failed extend hands the delta back.

use super::{log_settle_failure, LifecycleEngine};
use crate::controlplane::context::{Accepted, Context};
use crate::controlplane::scheduler::PlacementRequest;
use crate::domain::model::{
    BaseModel, DriverData, GroupStatus, SnapshotStatus, Volume, VolumeGroup, VolumeStatus,
};
use crate::domain::ports::{
    CreateVolumeOpts, DeleteVolumeOpts, DriverRole, ExtendVolumeOpts, ListFilter, OP_CREATE_VOLUME,
    OP_DELETE_VOLUME, OP_EXTEND_VOLUME,
};
use crate::domain::replication_data;
use crate::error::{Error, Result};
use crate::store::TableExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller intent for a new volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    /// Client-supplied id; repeated creates with the same id yield one volume
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// GiB
    pub size: u64,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub pool_id: Option<String>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub source_volume_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub multi_attach: bool,
    #[serde(default)]
    pub metadata: DriverData,
}

/// Narrow the placement to `pool_id`, rejecting contradictory sources
fn pin_pool(hint: &mut Option<String>, pool_id: &str, source: &str) -> Result<()> {
    match hint {
        Some(current) if current != pool_id => Err(Error::Validation(format!(
            "{} lives on pool {}, which conflicts with pool {}",
            source, pool_id, current
        ))),
        _ => {
            *hint = Some(pool_id.to_string());
            Ok(())
        }
    }
}

impl LifecycleEngine {
    // =========================================================================
    // Create
    // =========================================================================

    pub async fn create_volume(
        self: &Arc<Self>,
        ctx: &Context,
        request: CreateVolumeRequest,
    ) -> Result<Accepted<Volume>> {
        if request.size == 0 {
            return Err(Error::Validation("volume size must be positive".into()));
        }

        if let Some(id) = request.id.as_deref() {
            if let Some(existing) = self.store.volumes().get(id).await? {
                ctx.authorize(&existing)?;
                return self.redrive_create(ctx, existing).await;
            }
        }

        let profile = self.resolve_profile(request.profile_id.as_deref()).await?;
        let mut pool_hint = request.pool_id.clone();
        let mut consistency_group = false;

        if let Some(snapshot_id) = request.snapshot_id.as_deref() {
            let snapshot = self.store.snapshots().get(snapshot_id).await?.ok_or_else(|| {
                Error::Validation(format!("snapshot {} does not exist", snapshot_id))
            })?;
            ctx.authorize(&snapshot)?;
            if snapshot.status != SnapshotStatus::Available {
                return Err(Error::precondition(
                    "snapshot",
                    snapshot_id,
                    format!("status is {}, expected available", snapshot.status),
                ));
            }
            if snapshot.size > request.size {
                return Err(Error::Validation(format!(
                    "snapshot {} is {} GiB, larger than the requested {} GiB",
                    snapshot_id, snapshot.size, request.size
                )));
            }
            if let Some(source) = self.store.volumes().get(&snapshot.volume_id).await? {
                pin_pool(&mut pool_hint, &source.pool_id, "snapshot")?;
            }
        }

        if let Some(source_id) = request.source_volume_id.as_deref() {
            let source = self.store.volumes().get(source_id).await?.ok_or_else(|| {
                Error::Validation(format!("source volume {} does not exist", source_id))
            })?;
            ctx.authorize(&source)?;
            if !matches!(source.status, VolumeStatus::Available | VolumeStatus::InUse) {
                return Err(Error::precondition(
                    "volume",
                    source_id,
                    format!("cannot clone a volume in status {}", source.status),
                ));
            }
            if source.size > request.size {
                return Err(Error::Validation(format!(
                    "source volume {} is {} GiB, larger than the requested {} GiB",
                    source_id, source.size, request.size
                )));
            }
            pin_pool(&mut pool_hint, &source.pool_id, "source volume")?;
        }

        if let Some(group_id) = request.group_id.as_deref() {
            let group = self.group_for_join(ctx, group_id, &profile.base.id).await?;
            pin_pool(&mut pool_hint, &group.pool_id, "group")?;
            consistency_group = true;
        }

        let multi_attach = request.multi_attach || profile.properties.multi_attach;
        let placement = self
            .scheduler
            .select(&PlacementRequest {
                profile: &profile,
                size: request.size,
                availability_zone: request.availability_zone.clone(),
                pool_hint,
                multi_attach,
                consistency_group,
            })
            .await?;
        self.ensure_ready(placement.backend(), DriverRole::Provision)?;

        let volume = Volume {
            base: BaseModel::new(request.id.clone(), &ctx.tenant_id, &ctx.user_id),
            name: request.name,
            description: request.description,
            size: request.size,
            status: VolumeStatus::Creating,
            availability_zone: placement.pool.availability_zone.clone(),
            pool_id: placement.pool.base.id.clone(),
            profile_id: profile.base.id.clone(),
            group_id: request.group_id,
            snapshot_id: request.snapshot_id,
            source_volume_id: request.source_volume_id,
            multi_attach,
            replication_driver_data: DriverData::new(),
            metadata: request.metadata,
            error_reason: None,
        };

        let volume = match self.store.volumes().create(volume).await {
            Ok(volume) => volume,
            Err(Error::ResourceExists { id, .. }) => {
                // Lost a race against an identical create
                let existing = self.store.volumes().must_get(&id).await?;
                ctx.authorize(&existing)?;
                return Ok(Accepted::done(existing));
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self.inventory.debit(&volume.pool_id, volume.size).await {
            warn!("Could not reserve capacity for volume {}: {}", volume.base.id, e);
        }

        info!(
            "Volume {} accepted: {} GiB on pool {} ({})",
            volume.base.id,
            volume.size,
            placement.pool.name,
            placement.backend()
        );
        let task = self.spawn_create(ctx, volume.clone());
        Ok(Accepted::running(volume, task))
    }

    /// Group a new volume may join
    async fn group_for_join(
        &self,
        ctx: &Context,
        group_id: &str,
        profile_id: &str,
    ) -> Result<VolumeGroup> {
        let group = self
            .store
            .groups()
            .get(group_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("group {} does not exist", group_id)))?;
        ctx.authorize(&group)?;
        if group.status != GroupStatus::Available {
            return Err(Error::precondition(
                "group",
                group_id,
                format!("status is {}, expected available", group.status),
            ));
        }
        if !group.profile_ids.iter().any(|p| p == profile_id) {
            return Err(Error::Validation(format!(
                "profile {} is not allowed in group {}",
                profile_id, group_id
            )));
        }
        Ok(group)
    }

    /// Repeated create for an id already on record
    async fn redrive_create(
        self: &Arc<Self>,
        ctx: &Context,
        existing: Volume,
    ) -> Result<Accepted<Volume>> {
        if existing.status != VolumeStatus::Creating {
            debug!("Volume {} already exists ({})", existing.base.id, existing.status);
            return Ok(Accepted::done(existing));
        }
        let pool = self.pool_of(&existing).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;

        info!("Re-driving create of volume {}", existing.base.id);
        let task = self.spawn_create(ctx, existing.clone());
        Ok(Accepted::running(existing, task))
    }

    fn spawn_create(self: &Arc<Self>, ctx: &Context, volume: Volume) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let task_ctx = ctx.clone();
        self.spawn(ctx, OP_CREATE_VOLUME, async move {
            engine.drive_create(&task_ctx, volume).await;
        })
    }

    async fn drive_create(&self, ctx: &Context, volume: Volume) {
        let id = volume.base.id.clone();
        match self.provision(ctx, &volume).await {
            Ok(metadata) => {
                let settled = self
                    .store
                    .volumes()
                    .transition_with(
                        &id,
                        &[VolumeStatus::Creating],
                        VolumeStatus::Available,
                        Box::new(move |v: &mut Volume| {
                            v.metadata.extend(metadata);
                            Ok(())
                        }),
                    )
                    .await;
                if settled.is_ok() {
                    info!("Volume {} available", id);
                }
                self.metrics.operation("volume", "create", settled.is_ok());
                log_settle_failure("volume", &id, settled.map(|_| ()));
            }
            Err(e) => {
                self.metrics.operation("volume", "create", false);
                let settled = self
                    .store
                    .volumes()
                    .fail(&id, &[VolumeStatus::Creating], VolumeStatus::Error, e.to_string())
                    .await;
                log_settle_failure("volume", &id, settled.map(|_| ()));
            }
        }
    }

    async fn provision(&self, ctx: &Context, volume: &Volume) -> Result<DriverData> {
        let (pool, dock) = self.inventory.pool_and_dock(&volume.pool_id).await?;

        let mut opts = CreateVolumeOpts {
            id: volume.base.id.clone(),
            name: volume.name.clone(),
            description: volume.description.clone(),
            size: volume.size,
            availability_zone: volume.availability_zone.clone(),
            pool_id: pool.base.id.clone(),
            pool_name: pool.name.clone(),
            profile_id: volume.profile_id.clone(),
            dock_id: dock.base.id.clone(),
            driver_name: dock.driver_name.clone(),
            snapshot_id: volume.snapshot_id.clone(),
            source_volume_id: volume.source_volume_id.clone(),
            group_id: volume.group_id.clone(),
            multi_attach: volume.multi_attach,
            metadata: volume.metadata.clone(),
            ..Default::default()
        };
        if let Some(snapshot_id) = &volume.snapshot_id {
            let snapshot = self.store.snapshots().must_get(snapshot_id).await?;
            opts.snapshot_size = Some(snapshot.size);
            opts.snapshot_metadata = snapshot.metadata;
        }
        if let Some(source_id) = &volume.source_volume_id {
            opts.source_volume_metadata = self.store.volumes().must_get(source_id).await?.metadata;
        }

        let backend = pool.backend_name.as_str();
        let result = self
            .invoke(ctx, backend, OP_CREATE_VOLUME, async {
                let driver = self.manager.volume_driver(backend).await?;
                driver.create_volume(&opts).await
            })
            .await?;
        Ok(result.metadata)
    }

    // =========================================================================
    // Extend
    // =========================================================================

    pub async fn extend_volume(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
        new_size: u64,
    ) -> Result<Accepted<Volume>> {
        let volume = self.store.volumes().must_get(id).await?;
        if let Some(pair) = replication_data::replication_id(&volume.replication_driver_data) {
            return Err(Error::precondition(
                "volume",
                id,
                format!("is replicated by {} and must keep its peer's size", pair),
            ));
        }
        if new_size <= volume.size {
            return Err(Error::Validation(format!(
                "new size {} GiB must exceed the current {} GiB",
                new_size, volume.size
            )));
        }
        let delta = new_size - volume.size;
        let pool = self.pool_of(&volume).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;
        self.inventory.ensure_capacity(&pool.base.id, delta).await?;

        let volume = self
            .store
            .volumes()
            .transition(id, &[VolumeStatus::Available], VolumeStatus::Extending)
            .await?;
        if let Err(e) = self.inventory.debit(&pool.base.id, delta).await {
            warn!("Could not reserve capacity for volume {}: {}", id, e);
        }
        info!("Volume {} extending {} -> {} GiB", id, volume.size, new_size);

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = volume.clone();
        let task = self.spawn(ctx, OP_EXTEND_VOLUME, async move {
            engine.drive_extend(&task_ctx, record, new_size).await;
        });
        Ok(Accepted::running(volume, task))
    }

    async fn drive_extend(&self, ctx: &Context, volume: Volume, new_size: u64) {
        let id = volume.base.id.clone();
        let delta = new_size - volume.size;

        let result = async {
            let pool = self.pool_of(&volume).await?;
            let opts = ExtendVolumeOpts {
                id: id.clone(),
                pool_name: pool.name.clone(),
                size: new_size,
                delta,
                metadata: volume.metadata.clone(),
            };
            let backend = pool.backend_name.as_str();
            self.invoke(ctx, backend, OP_EXTEND_VOLUME, async {
                let driver = self.manager.volume_driver(backend).await?;
                driver.extend_volume(&opts).await
            })
            .await
        }
        .await;

        self.metrics.operation("volume", "extend", result.is_ok());
        let settled = match result {
            Ok(returned) => {
                let settled = self
                    .store
                    .volumes()
                    .transition_with(
                        &id,
                        &[VolumeStatus::Extending],
                        VolumeStatus::Available,
                        Box::new(move |v: &mut Volume| {
                            v.size = new_size;
                            v.metadata.extend(returned.metadata);
                            Ok(())
                        }),
                    )
                    .await;
                if settled.is_ok() {
                    info!("Volume {} extended to {} GiB", id, new_size);
                }
                settled
            }
            Err(e) => {
                if let Err(credit_err) = self.inventory.credit(&volume.pool_id, delta).await {
                    warn!("Could not return capacity for volume {}: {}", id, credit_err);
                }
                self.store
                    .volumes()
                    .fail(&id, &[VolumeStatus::Extending], VolumeStatus::Error, e.to_string())
                    .await
            }
        };
        log_settle_failure("volume", &id, settled.map(|_| ()));
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a volume. Already deleting or absent volumes are a no-op.
    pub async fn delete_volume(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<Volume>>> {
        let Some(volume) = self.store.volumes().get(id).await? else {
            debug!("Volume {} already removed", id);
            return Ok(Accepted::done(None));
        };
        if volume.status == VolumeStatus::Deleting {
            return Ok(Accepted::done(Some(volume)));
        }
        self.check_volume_deletable(&volume).await?;

        let pool = self.pool_of(&volume).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;

        let volume = self
            .store
            .volumes()
            .transition(
                id,
                &[VolumeStatus::Available, VolumeStatus::Error, VolumeStatus::ErrorDeleting],
                VolumeStatus::Deleting,
            )
            .await?;
        info!("Volume {} deleting", id);

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = volume.clone();
        let task = self.spawn(ctx, OP_DELETE_VOLUME, async move {
            engine.drive_delete(&task_ctx, record).await;
        });
        Ok(Accepted::running(Some(volume), task))
    }

    /// Snapshots, attachments, pairs and groups all pin a volume
    async fn check_volume_deletable(&self, volume: &Volume) -> Result<()> {
        let id = volume.base.id.as_str();

        let snapshots = self
            .store
            .snapshots()
            .list(&ListFilter::new().field("volumeId", id))
            .await?;
        if !snapshots.is_empty() {
            let ids: Vec<&str> = snapshots.iter().map(|s| s.base.id.as_str()).collect();
            return Err(Error::precondition(
                "volume",
                id,
                format!("has snapshots: {}", ids.join(", ")),
            ));
        }

        // Every attachment record, errored ones included, must keep its volume
        let attachments = self
            .store
            .attachments()
            .list(&ListFilter::new().field("volumeId", id))
            .await?;
        if !attachments.is_empty() {
            let ids: Vec<&str> = attachments.iter().map(|a| a.base.id.as_str()).collect();
            return Err(Error::precondition(
                "volume",
                id,
                format!("has attachments: {}", ids.join(", ")),
            ));
        }

        if let Some(pair) = replication_data::replication_id(&volume.replication_driver_data) {
            return Err(Error::precondition(
                "volume",
                id,
                format!("is part of replication {}", pair),
            ));
        }
        if let Some(group) = &volume.group_id {
            return Err(Error::precondition(
                "volume",
                id,
                format!("is a member of group {}", group),
            ));
        }
        Ok(())
    }

    async fn drive_delete(&self, ctx: &Context, volume: Volume) {
        let id = volume.base.id.clone();

        let result = async {
            let pool = self.pool_of(&volume).await?;
            let opts = DeleteVolumeOpts {
                id: id.clone(),
                pool_name: pool.name.clone(),
                size: volume.size,
                metadata: volume.metadata.clone(),
            };
            let backend = pool.backend_name.as_str();
            self.invoke(ctx, backend, OP_DELETE_VOLUME, async {
                let driver = self.manager.volume_driver(backend).await?;
                driver.delete_volume(&opts).await
            })
            .await
        }
        .await;

        self.metrics.operation("volume", "delete", result.is_ok());
        match result {
            Ok(()) => {
                match self.store.volumes().delete(&id).await {
                    Ok(_) => info!("Volume {} deleted", id),
                    Err(e) => warn!("Could not remove volume record {}: {}", id, e),
                }
                if let Err(e) = self.inventory.credit(&volume.pool_id, volume.size).await {
                    warn!("Could not return capacity for volume {}: {}", id, e);
                }
            }
            Err(e) => {
                let settled = self
                    .store
                    .volumes()
                    .fail(&id, &[VolumeStatus::Deleting], VolumeStatus::ErrorDeleting, e.to_string())
                    .await;
                log_settle_failure("volume", &id, settled.map(|_| ()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::testing::Harness;
    use crate::controlplane::lifecycle::CreateAttachmentRequest;
    use crate::domain::model::AttachmentStatus;
    use crate::domain::ports::OP_INITIALIZE_CONNECTION;
    use crate::drivers::sample::Fault;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_create_debits_pool() {
        let h = Harness::new().await;
        let ctx = h.ctx();

        let accepted = h
            .engine
            .create_volume(&ctx, CreateVolumeRequest { name: "v1".into(), size: 1, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(accepted.record.status, VolumeStatus::Creating);
        let volume = accepted.join().await.unwrap();

        let stored = h.store.volumes().must_get(&volume.base.id).await.unwrap();
        assert_eq!(stored.status, VolumeStatus::Available);
        assert!(stored.metadata.contains_key("lvPath"));
        assert_eq!(h.pool(&stored.pool_id).await.free_capacity, 99);
    }

    #[tokio::test]
    async fn test_create_failure_records_reason() {
        let h = Harness::new().await;
        h.driver("b1").inject(Fault::Fail(OP_CREATE_VOLUME));
        h.driver("b2").inject(Fault::Fail(OP_CREATE_VOLUME));

        let volume = h
            .engine
            .create_volume(&h.ctx(), CreateVolumeRequest { name: "v1".into(), size: 1, ..Default::default() })
            .await
            .unwrap()
            .join()
            .await
            .unwrap();

        let stored = h.store.volumes().must_get(&volume.base.id).await.unwrap();
        assert_eq!(stored.status, VolumeStatus::Error);
        assert!(stored.error_reason.unwrap().contains("injected fault"));
    }

    #[tokio::test]
    async fn test_validation() {
        let h = Harness::new().await;
        let zero = CreateVolumeRequest { name: "v".into(), size: 0, ..Default::default() };
        assert_matches!(h.engine.create_volume(&h.ctx(), zero).await, Err(Error::Validation(_)));

        let unknown = CreateVolumeRequest {
            name: "v".into(),
            size: 1,
            profile_id: Some("nope".into()),
            ..Default::default()
        };
        assert_matches!(h.engine.create_volume(&h.ctx(), unknown).await, Err(Error::Validation(_)));

        let huge = CreateVolumeRequest { name: "v".into(), size: 10_000, ..Default::default() };
        assert_matches!(h.engine.create_volume(&h.ctx(), huge).await, Err(Error::NoEligiblePool { .. }));
        assert!(h.store.volumes().list(&ListFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extend_and_failed_extend() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        let volume = h.volume(&ctx, "v1", 1).await;

        let extended = h.engine.extend_volume(&ctx, &volume.base.id, 5).await.unwrap();
        assert_eq!(extended.record.status, VolumeStatus::Extending);
        extended.join().await.unwrap();
        let stored = h.store.volumes().must_get(&volume.base.id).await.unwrap();
        assert_eq!((stored.status, stored.size), (VolumeStatus::Available, 5));
        assert_eq!(h.pool(&stored.pool_id).await.free_capacity, 95);

        assert_matches!(
            h.engine.extend_volume(&ctx, &volume.base.id, 5).await,
            Err(Error::Validation(_))
        );

        h.driver(h.backend_of(&stored).await.as_str()).inject(Fault::Fail(OP_EXTEND_VOLUME));
        h.engine.extend_volume(&ctx, &volume.base.id, 7).await.unwrap().join().await.unwrap();
        let stored = h.store.volumes().must_get(&volume.base.id).await.unwrap();
        assert_eq!((stored.status, stored.size), (VolumeStatus::Error, 5));
        assert_eq!(h.pool(&stored.pool_id).await.free_capacity, 95);
    }

    #[tokio::test]
    async fn test_delete_returns_capacity_and_is_idempotent() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        let volume = h.volume(&ctx, "v1", 4).await;

        let deleted = h.engine.delete_volume(&ctx, &volume.base.id).await.unwrap();
        assert_eq!(deleted.record.as_ref().unwrap().status, VolumeStatus::Deleting);
        deleted.join().await.unwrap();

        assert!(h.store.volumes().get(&volume.base.id).await.unwrap().is_none());
        assert_eq!(h.pool(&volume.pool_id).await.free_capacity, 100);

        let again = h.engine.delete_volume(&ctx, &volume.base.id).await.unwrap();
        assert!(again.is_settled());
        assert!(again.join().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_refused_with_snapshots() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        let volume = h.volume(&ctx, "v1", 1).await;
        let snapshot = h.snapshot(&ctx, &volume.base.id, "s1").await;
        assert_eq!(snapshot.status, SnapshotStatus::Available);

        let err = h.engine.delete_volume(&ctx, &volume.base.id).await.unwrap_err();
        assert_matches!(&err, Error::Precondition { reason, .. } if reason.contains("s1"));
    }

    #[tokio::test]
    async fn test_delete_refused_with_errored_attachment() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        let volume = h.volume(&ctx, "v1", 1).await;
        h.driver("b1").inject(Fault::Fail(OP_INITIALIZE_CONNECTION));
        let attachment = h
            .engine
            .create_attachment(
                &ctx,
                CreateAttachmentRequest {
                    volume_id: volume.base.id.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .join()
            .await
            .unwrap();
        let stored = h.store.attachments().must_get(&attachment.base.id).await.unwrap();
        assert_eq!(stored.status, AttachmentStatus::Error);
        assert!(h.engine.live_attachments(&volume.base.id).await.unwrap().is_empty());

        let err = h.engine.delete_volume(&ctx, &volume.base.id).await.unwrap_err();
        assert_matches!(
            &err,
            Error::Precondition { reason, .. } if reason.contains(&attachment.base.id)
        );

        h.driver("b1").clear_faults();
        h.engine
            .delete_attachment(&ctx, &attachment.base.id)
            .await
            .unwrap()
            .join()
            .await
            .unwrap();
        h.engine.delete_volume(&ctx, &volume.base.id).await.unwrap().join().await.unwrap();
        assert!(h.store.volumes().get(&volume.base.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeated_create_yields_one_volume() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        let request = CreateVolumeRequest {
            id: Some("fixed".into()),
            name: "v1".into(),
            size: 2,
            ..Default::default()
        };

        let first = h.engine.create_volume(&ctx, request.clone()).await.unwrap();
        first.join().await.unwrap();
        let second = h.engine.create_volume(&ctx, request).await.unwrap();
        assert!(second.is_settled());
        assert_eq!(second.record.status, VolumeStatus::Available);

        let all = h.store.volumes().list(&ListFilter::new()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(h.pool(&all[0].pool_id).await.free_capacity, 98);
    }

    #[tokio::test]
    async fn test_clone_from_snapshot_lands_on_source_pool() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        let volume = h.volume(&ctx, "v1", 2).await;
        let snapshot = h.snapshot(&ctx, &volume.base.id, "s1").await;

        let too_small = CreateVolumeRequest {
            name: "c".into(),
            size: 1,
            snapshot_id: Some(snapshot.base.id.clone()),
            ..Default::default()
        };
        assert_matches!(h.engine.create_volume(&ctx, too_small).await, Err(Error::Validation(_)));

        let clone = h
            .engine
            .create_volume(
                &ctx,
                CreateVolumeRequest {
                    name: "c".into(),
                    size: 3,
                    snapshot_id: Some(snapshot.base.id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .join()
            .await
            .unwrap();
        let clone = h.store.volumes().must_get(&clone.base.id).await.unwrap();
        assert_eq!(clone.status, VolumeStatus::Available);
        assert_eq!(clone.pool_id, volume.pool_id);
    }

    #[tokio::test]
    async fn test_pending_backend_fails_fast() {
        let h = Harness::unstarted().await;
        let request = CreateVolumeRequest { name: "v".into(), size: 1, ..Default::default() };
        assert_matches!(
            h.engine.create_volume(&h.ctx(), request).await,
            Err(Error::InitializationPending { .. })
        );
        assert!(h.store.volumes().list(&ListFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_fails_volume() {
        let h = Harness::new().await;
        h.driver("b1").inject(Fault::Hang(OP_CREATE_VOLUME));
        h.driver("b2").inject(Fault::Hang(OP_CREATE_VOLUME));
        let ctx = h.ctx();

        let accepted = h
            .engine
            .create_volume(&ctx, CreateVolumeRequest { name: "v1".into(), size: 1, ..Default::default() })
            .await
            .unwrap();
        ctx.cancel.cancel();
        let volume = accepted.join().await.unwrap();

        let stored = h.store.volumes().must_get(&volume.base.id).await.unwrap();
        assert_eq!(stored.status, VolumeStatus::Error);
        assert!(stored.error_reason.unwrap().contains("cancelled"));
    }
}
