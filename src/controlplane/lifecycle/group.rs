//! Volume group create / update / delete
//!
//! Group calls report one outcome per member volume. Member failures settle
//! that volume alone; only a failure of the whole call fails the group.

use super::{log_settle_failure, LifecycleEngine};
use crate::controlplane::context::{Accepted, Context};
use crate::controlplane::scheduler::PlacementRequest;
use crate::domain::model::{
    BaseModel, DriverData, GroupStatus, Profile, Volume, VolumeGroup, VolumeStatus,
};
use crate::domain::ports::{
    CreateVolumeGroupOpts, DeleteVolumeGroupOpts, DriverRole, ListFilter, SnapshotRef,
    UpdateVolumeGroupOpts, VolumeRef, OP_CREATE_VOLUME_GROUP, OP_DELETE_VOLUME_GROUP,
    OP_UPDATE_VOLUME_GROUP,
};
use crate::domain::replication_data;
use crate::error::{Error, Result};
use crate::store::TableExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller intent for a new group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    pub profile_ids: Vec<String>,
    #[serde(default)]
    pub pool_id: Option<String>,
}

/// Membership and naming changes to a group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub add_volumes: Vec<String>,
    #[serde(default)]
    pub remove_volumes: Vec<String>,
}

fn volume_ref(volume: &Volume) -> VolumeRef {
    VolumeRef {
        id: volume.base.id.clone(),
        size: volume.size,
        metadata: volume.metadata.clone(),
    }
}

impl LifecycleEngine {
    // =========================================================================
    // Create
    // =========================================================================

    pub async fn create_group(
        self: &Arc<Self>,
        ctx: &Context,
        request: CreateGroupRequest,
    ) -> Result<Accepted<VolumeGroup>> {
        if let Some(id) = request.id.as_deref() {
            if let Some(existing) = self.store.groups().get(id).await? {
                ctx.authorize(&existing)?;
                return Ok(Accepted::done(existing));
            }
        }
        if request.profile_ids.is_empty() {
            return Err(Error::Validation("a group needs at least one profile".into()));
        }

        let mut profiles: Vec<Profile> = Vec::with_capacity(request.profile_ids.len());
        for profile_id in &request.profile_ids {
            let profile = self.resolve_profile(Some(profile_id)).await?;
            if let Some(first) = profiles.first() {
                if first.storage_type != profile.storage_type {
                    return Err(Error::Validation(format!(
                        "profile {} is {}, group profiles must all be {}",
                        profile_id, profile.storage_type, first.storage_type
                    )));
                }
            }
            profiles.push(profile);
        }

        if let Some(pool_id) = request.pool_id.as_deref() {
            let pool = self.store.pools().get(pool_id).await?.ok_or_else(|| {
                Error::Validation(format!("pool {} does not exist", pool_id))
            })?;
            if !pool.supports_consistency_groups() {
                return Err(Error::Validation(format!(
                    "pool {} does not support consistency groups",
                    pool.name
                )));
            }
        }
        let placement = self
            .scheduler
            .select(&PlacementRequest {
                profile: &profiles[0],
                size: 0,
                availability_zone: request.availability_zone.clone(),
                pool_hint: request.pool_id.clone(),
                multi_attach: false,
                consistency_group: true,
            })
            .await?;
        self.ensure_ready(placement.backend(), DriverRole::Provision)?;

        let group = VolumeGroup {
            base: BaseModel::new(request.id, &ctx.tenant_id, &ctx.user_id),
            name: request.name,
            description: request.description,
            pool_id: placement.pool.base.id.clone(),
            availability_zone: placement.pool.availability_zone.clone(),
            profile_ids: request.profile_ids,
            status: GroupStatus::Creating,
            metadata: DriverData::new(),
            error_reason: None,
        };
        let group = self.store.groups().create(group).await?;
        info!("Group {} accepted on pool {}", group.base.id, placement.pool.name);

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = group.clone();
        let pool = placement.pool;
        let task = self.spawn(ctx, OP_CREATE_VOLUME_GROUP, async move {
            let id = record.base.id.clone();
            let opts = CreateVolumeGroupOpts {
                id: id.clone(),
                name: record.name.clone(),
                pool_name: pool.name.clone(),
                profile_ids: record.profile_ids.clone(),
            };
            let backend = pool.backend_name.as_str();
            let result = engine
                .invoke(&task_ctx, backend, OP_CREATE_VOLUME_GROUP, async {
                    let driver = engine.manager.volume_driver(backend).await?;
                    driver.create_volume_group(&opts).await
                })
                .await;

            engine.metrics.operation("group", "create", result.is_ok());
            let settled = match result {
                Ok(returned) => {
                    engine
                        .store
                        .groups()
                        .transition_with(
                            &id,
                            &[GroupStatus::Creating],
                            GroupStatus::Available,
                            Box::new(move |g: &mut VolumeGroup| {
                                g.metadata.extend(returned.metadata);
                                Ok(())
                            }),
                        )
                        .await
                }
                Err(e) => {
                    engine
                        .store
                        .groups()
                        .fail(&id, &[GroupStatus::Creating], GroupStatus::Error, e.to_string())
                        .await
                }
            };
            if let Ok(group) = &settled {
                info!("Group {} settled as {}", id, group.status);
            }
            log_settle_failure("group", &id, settled.map(|_| ()));
        });
        Ok(Accepted::running(group, task))
    }

    // =========================================================================
    // Update
    // =========================================================================

    pub async fn update_group(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
        request: UpdateGroupRequest,
    ) -> Result<Accepted<VolumeGroup>> {
        let group = self.store.groups().must_get(id).await?;

        let adds: HashSet<&String> = request.add_volumes.iter().collect();
        if let Some(both) = request.remove_volumes.iter().find(|v| adds.contains(v)) {
            return Err(Error::Validation(format!(
                "volume {} is both added and removed",
                both
            )));
        }

        let mut add_volumes = Vec::with_capacity(request.add_volumes.len());
        for volume_id in &request.add_volumes {
            let volume = self.member_candidate(ctx, volume_id).await?;
            if volume.status != VolumeStatus::Available {
                return Err(Error::precondition(
                    "volume",
                    volume_id,
                    format!("status is {}, expected available", volume.status),
                ));
            }
            if volume.pool_id != group.pool_id {
                return Err(Error::Validation(format!(
                    "volume {} is not on the group's pool",
                    volume_id
                )));
            }
            if let Some(other) = &volume.group_id {
                return Err(Error::precondition(
                    "volume",
                    volume_id,
                    format!("already a member of group {}", other),
                ));
            }
            if !group.profile_ids.contains(&volume.profile_id) {
                return Err(Error::Validation(format!(
                    "profile {} of volume {} is not allowed in group {}",
                    volume.profile_id, volume_id, id
                )));
            }
            add_volumes.push(volume);
        }

        let mut remove_volumes = Vec::with_capacity(request.remove_volumes.len());
        for volume_id in &request.remove_volumes {
            let volume = self.member_candidate(ctx, volume_id).await?;
            if volume.group_id.as_deref() != Some(id) {
                return Err(Error::Validation(format!(
                    "volume {} is not a member of group {}",
                    volume_id, id
                )));
            }
            if !matches!(volume.status, VolumeStatus::Available | VolumeStatus::Error) {
                return Err(Error::precondition(
                    "volume",
                    volume_id,
                    format!("status is {}, expected available or error", volume.status),
                ));
            }
            remove_volumes.push(volume);
        }

        let name = request.name;
        let description = request.description;
        if add_volumes.is_empty() && remove_volumes.is_empty() {
            // Rename only, no driver involvement
            let group = self
                .store
                .groups()
                .update(
                    id,
                    Box::new(move |g: &mut VolumeGroup| {
                        if let Some(name) = name {
                            g.name = name;
                        }
                        if let Some(description) = description {
                            g.description = description;
                        }
                        Ok(())
                    }),
                )
                .await?;
            return Ok(Accepted::done(group));
        }

        let pool = self.inventory.pool(&group.pool_id).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;

        let group = self
            .store
            .groups()
            .transition_with(
                id,
                &[GroupStatus::Available],
                GroupStatus::Updating,
                Box::new(move |g: &mut VolumeGroup| {
                    if let Some(name) = name {
                        g.name = name;
                    }
                    if let Some(description) = description {
                        g.description = description;
                    }
                    Ok(())
                }),
            )
            .await?;
        info!(
            "Group {} updating: +{} -{} volumes",
            id,
            add_volumes.len(),
            remove_volumes.len()
        );

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = group.clone();
        let task = self.spawn(ctx, OP_UPDATE_VOLUME_GROUP, async move {
            let id = record.base.id.clone();
            let opts = UpdateVolumeGroupOpts {
                id: id.clone(),
                pool_name: pool.name.clone(),
                add_volumes: add_volumes.iter().map(volume_ref).collect(),
                remove_volumes: remove_volumes.iter().map(volume_ref).collect(),
                metadata: record.metadata.clone(),
            };
            let backend = pool.backend_name.as_str();
            let result = engine
                .invoke(&task_ctx, backend, OP_UPDATE_VOLUME_GROUP, async {
                    let driver = engine.manager.volume_driver(backend).await?;
                    driver.update_volume_group(&opts).await
                })
                .await;

            engine.metrics.operation("group", "update", result.is_ok());
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    let settled = engine
                        .store
                        .groups()
                        .fail(&id, &[GroupStatus::Updating], GroupStatus::Error, e.to_string())
                        .await;
                    log_settle_failure("group", &id, settled.map(|_| ()));
                    return;
                }
            };

            for volume in &add_volumes {
                let group_id = Some(id.clone());
                engine.settle_member(volume, outcome.failure_for(&volume.base.id), group_id).await;
            }
            for volume in &remove_volumes {
                engine.settle_member(volume, outcome.failure_for(&volume.base.id), None).await;
            }

            let settled = engine
                .store
                .groups()
                .transition(&id, &[GroupStatus::Updating], GroupStatus::Available)
                .await;
            if settled.is_ok() {
                info!("Group {} updated", id);
            }
            log_settle_failure("group", &id, settled.map(|_| ()));
        });
        Ok(Accepted::running(group, task))
    }

    async fn member_candidate(&self, ctx: &Context, volume_id: &str) -> Result<Volume> {
        let volume = self
            .store
            .volumes()
            .get(volume_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("volume {} does not exist", volume_id)))?;
        ctx.authorize(&volume)?;
        Ok(volume)
    }

    /// Apply one member's outcome: failure marks the volume `error`,
    /// success rewrites its group membership
    async fn settle_member(&self, volume: &Volume, failure: Option<&str>, group_id: Option<String>) {
        let volume_id = volume.base.id.as_str();
        let settled = match failure {
            Some(reason) => {
                warn!("Group member {} failed: {}", volume_id, reason);
                self.store
                    .volumes()
                    .fail(
                        volume_id,
                        &[VolumeStatus::Available, VolumeStatus::Error],
                        VolumeStatus::Error,
                        reason.to_string(),
                    )
                    .await
            }
            None => {
                self.store
                    .volumes()
                    .update(
                        volume_id,
                        Box::new(move |v: &mut Volume| {
                            v.group_id = group_id;
                            Ok(())
                        }),
                    )
                    .await
            }
        };
        log_settle_failure("volume", volume_id, settled.map(|_| ()));
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a group together with its member volumes and their snapshots
    pub async fn delete_group(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<VolumeGroup>>> {
        let Some(group) = self.store.groups().get(id).await? else {
            debug!("Group {} already removed", id);
            return Ok(Accepted::done(None));
        };
        if group.status == GroupStatus::Deleting {
            return Ok(Accepted::done(Some(group)));
        }

        let members = self
            .store
            .volumes()
            .list(&ListFilter::new().field("groupId", id))
            .await?;
        for member in &members {
            let member_id = member.base.id.as_str();
            if !matches!(
                member.status,
                VolumeStatus::Available | VolumeStatus::Error | VolumeStatus::ErrorDeleting
            ) {
                return Err(Error::precondition(
                    "group",
                    id,
                    format!("member {} is {}", member_id, member.status),
                ));
            }
            if !self.live_attachments(member_id).await?.is_empty() {
                return Err(Error::precondition(
                    "group",
                    id,
                    format!("member {} is attached", member_id),
                ));
            }
            if let Some(pair) = replication_data::replication_id(&member.replication_driver_data) {
                return Err(Error::precondition(
                    "group",
                    id,
                    format!("member {} is part of replication {}", member_id, pair),
                ));
            }
        }

        let pool = self.inventory.pool(&group.pool_id).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;

        let group = self
            .store
            .groups()
            .transition(id, &[GroupStatus::Available, GroupStatus::Error], GroupStatus::Deleting)
            .await?;
        info!("Group {} deleting with {} members", id, members.len());

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = group.clone();
        let task = self.spawn(ctx, OP_DELETE_VOLUME_GROUP, async move {
            let id = record.base.id.clone();

            let mut volumes = Vec::with_capacity(members.len());
            let mut snapshots = Vec::new();
            for member in members {
                let moved = engine
                    .store
                    .volumes()
                    .transition(
                        &member.base.id,
                        &[VolumeStatus::Available, VolumeStatus::Error, VolumeStatus::ErrorDeleting],
                        VolumeStatus::Deleting,
                    )
                    .await;
                match moved {
                    Ok(volume) => {
                        let filter = ListFilter::new().field("volumeId", volume.base.id.as_str());
                        match engine.store.snapshots().list(&filter).await {
                            Ok(found) => snapshots.extend(found),
                            Err(e) => warn!("Could not list snapshots of {}: {}", volume.base.id, e),
                        }
                        volumes.push(volume);
                    }
                    Err(e) => warn!("Group member {} skipped: {}", member.base.id, e),
                }
            }

            let opts = DeleteVolumeGroupOpts {
                id: id.clone(),
                pool_name: pool.name.clone(),
                volumes: volumes.iter().map(volume_ref).collect(),
                snapshots: snapshots
                    .iter()
                    .map(|s| SnapshotRef {
                        id: s.base.id.clone(),
                        volume_id: s.volume_id.clone(),
                        metadata: s.metadata.clone(),
                    })
                    .collect(),
                metadata: record.metadata.clone(),
            };
            let backend = pool.backend_name.as_str();
            let result = engine
                .invoke(&task_ctx, backend, OP_DELETE_VOLUME_GROUP, async {
                    let driver = engine.manager.volume_driver(backend).await?;
                    driver.delete_volume_group(&opts).await
                })
                .await;

            engine.metrics.operation("group", "delete", result.is_ok());
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = e.to_string();
                    for volume in &volumes {
                        engine.fail_member_delete(&volume.base.id, reason.clone()).await;
                    }
                    let settled = engine
                        .store
                        .groups()
                        .fail(&id, &[GroupStatus::Deleting], GroupStatus::Error, reason)
                        .await;
                    log_settle_failure("group", &id, settled.map(|_| ()));
                    return;
                }
            };

            let mut failed = 0;
            for volume in &volumes {
                let volume_id = volume.base.id.as_str();
                if let Some(reason) = outcome.failure_for(volume_id) {
                    failed += 1;
                    engine.fail_member_delete(volume_id, reason.to_string()).await;
                    continue;
                }
                for snapshot in snapshots.iter().filter(|s| s.volume_id == volume_id) {
                    if let Err(e) = engine.store.snapshots().delete(&snapshot.base.id).await {
                        warn!("Could not remove snapshot record {}: {}", snapshot.base.id, e);
                    }
                }
                if let Err(e) = engine.store.volumes().delete(volume_id).await {
                    warn!("Could not remove volume record {}: {}", volume_id, e);
                }
                if let Err(e) = engine.inventory.credit(&volume.pool_id, volume.size).await {
                    warn!("Could not return capacity for volume {}: {}", volume_id, e);
                }
            }

            if failed > 0 {
                let settled = engine
                    .store
                    .groups()
                    .fail(
                        &id,
                        &[GroupStatus::Deleting],
                        GroupStatus::Error,
                        format!("{} member volumes failed to delete", failed),
                    )
                    .await;
                log_settle_failure("group", &id, settled.map(|_| ()));
                return;
            }
            match engine.store.groups().delete(&id).await {
                Ok(_) => info!("Group {} deleted", id),
                Err(e) => warn!("Could not remove group record {}: {}", id, e),
            }
        });
        Ok(Accepted::running(Some(group), task))
    }

    async fn fail_member_delete(&self, volume_id: &str, reason: String) {
        let settled = self
            .store
            .volumes()
            .fail(volume_id, &[VolumeStatus::Deleting], VolumeStatus::ErrorDeleting, reason)
            .await;
        log_settle_failure("volume", volume_id, settled.map(|_| ()));
    }
}
