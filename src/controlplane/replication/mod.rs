//! Replication Coordinator
//!
//! Drives a replication pair as a two-sided operation: every step is applied
//! to the primary side first, then to the secondary. When the secondary
//! create fails the primary is compensated with a delete; nothing else is
//! rolled back or retried. Per-type preparation (bridging attachments for
//! host-based replication) lives in [`operator`].

pub mod operator;

pub use operator::{operator_for, ArrayBased, HostBased, ReplicationOperator, Side};

use super::context::{Accepted, Context};
use super::lifecycle::{log_settle_failure, LifecycleEngine};
use crate::domain::model::{
    AttachmentPurpose, BaseModel, DriverData, ReplicationMode, ReplicationPair,
    ReplicationStatus, Volume, VolumeDataEntry, VolumeStatus,
};
use crate::domain::ports::{
    DriverRole, FailoverOpts, ReplicationOpts, ReplicationResult, OP_CREATE_REPLICATION,
    OP_DELETE_REPLICATION, OP_DISABLE_REPLICATION, OP_ENABLE_REPLICATION,
    OP_FAILOVER_REPLICATION,
};
use crate::domain::replication_data;
use crate::error::{Error, Result};
use crate::store::TableExt;
use operator::ReplicationOperatorRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller intent for a new pair
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplicationRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub primary_volume_id: String,
    pub secondary_volume_id: String,
    /// Defaults to the primary volume's zone
    #[serde(default)]
    pub availability_zone: Option<String>,
    /// Defaults to the primary volume's profile
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub replication_mode: ReplicationMode,
    #[serde(default)]
    pub replication_period: u64,
    #[serde(default)]
    pub replication_bandwidth: u64,
}

/// Failover parameters as supplied by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverRequest {
    #[serde(default)]
    pub allow_attached_volume: bool,
    #[serde(default)]
    pub secondary_backend_id: String,
}

/// The symmetric driver calls
#[derive(Debug, Clone, Copy)]
enum Step<'a> {
    Delete,
    Enable,
    Disable,
    Failover(&'a FailoverOpts),
}

impl Step<'_> {
    fn operation(&self) -> &'static str {
        match self {
            Step::Delete => OP_DELETE_REPLICATION,
            Step::Enable => OP_ENABLE_REPLICATION,
            Step::Disable => OP_DISABLE_REPLICATION,
            Step::Failover(_) => OP_FAILOVER_REPLICATION,
        }
    }
}

/// What a successful two-sided create produced
struct Established {
    primary_data: DriverData,
    secondary_data: DriverData,
    volume_data_list: Vec<VolumeDataEntry>,
}

pub struct ReplicationCoordinator {
    engine: Arc<LifecycleEngine>,
}

impl ReplicationCoordinator {
    pub fn new(engine: Arc<LifecycleEngine>) -> Self {
        Self { engine }
    }

    // =========================================================================
    // Create
    // =========================================================================

    pub async fn create_replication(
        self: &Arc<Self>,
        ctx: &Context,
        request: CreateReplicationRequest,
    ) -> Result<Accepted<ReplicationPair>> {
        let store = self.engine.store();
        if let Some(id) = request.id.as_deref() {
            if let Some(existing) = store.replications().get(id).await? {
                ctx.authorize(&existing)?;
                return Ok(Accepted::done(existing));
            }
        }
        if request.primary_volume_id == request.secondary_volume_id {
            return Err(Error::Validation(
                "primary and secondary volume must differ".into(),
            ));
        }

        let primary = self.candidate(ctx, &request.primary_volume_id).await?;
        let secondary = self.candidate(ctx, &request.secondary_volume_id).await?;
        if primary.size != secondary.size {
            return Err(Error::Validation(format!(
                "volume sizes differ: primary {} GiB, secondary {} GiB",
                primary.size, secondary.size
            )));
        }

        let primary_side = self.side(primary, true).await?;
        let secondary_side = self.side(secondary, false).await?;
        let replication_type = primary_side.pool.replication_type;
        if replication_type != secondary_side.pool.replication_type {
            return Err(Error::Validation(format!(
                "pool replication types differ: {} vs {}",
                replication_type, secondary_side.pool.replication_type
            )));
        }
        let operator = operator_for(replication_type, &self.engine).ok_or_else(|| {
            Error::Validation(format!(
                "pool {} does not support replication",
                primary_side.pool.name
            ))
        })?;
        self.engine
            .ensure_ready(primary_side.backend(), DriverRole::Replication)?;
        self.engine
            .ensure_ready(secondary_side.backend(), DriverRole::Replication)?;

        let pair = ReplicationPair {
            base: BaseModel::new(request.id, &ctx.tenant_id, &ctx.user_id),
            name: request.name,
            description: request.description,
            primary_volume_id: primary_side.volume.base.id.clone(),
            secondary_volume_id: secondary_side.volume.base.id.clone(),
            availability_zone: request
                .availability_zone
                .unwrap_or_else(|| primary_side.volume.availability_zone.clone()),
            profile_id: request
                .profile_id
                .unwrap_or_else(|| primary_side.volume.profile_id.clone()),
            replication_mode: request.replication_mode,
            replication_period: request.replication_period,
            replication_bandwidth: request.replication_bandwidth,
            replication_type,
            primary_replication_driver_data: DriverData::new(),
            secondary_replication_driver_data: DriverData::new(),
            status: ReplicationStatus::Creating,
            volume_data_list: Vec::new(),
            error_reason: None,
        };
        let pair = store.replications().create(pair).await?;
        info!(
            "Replication {} accepted: {} -> {} ({})",
            pair.base.id, pair.primary_volume_id, pair.secondary_volume_id, replication_type
        );

        let coordinator = self.clone();
        let task_ctx = ctx.clone();
        let record = pair.clone();
        let task = self.engine.spawn(ctx, OP_CREATE_REPLICATION, async move {
            let id = record.base.id.clone();
            let sides = [primary_side, secondary_side];
            let result = coordinator
                .establish(&task_ctx, &record, &sides, &operator)
                .await;
            coordinator
                .engine
                .metrics()
                .operation("replication", "create", result.is_ok());

            let settled = match result {
                Ok(established) => coordinator.settle_created(&id, &sides, established).await,
                Err(e) => coordinator
                    .engine
                    .store()
                    .replications()
                    .fail(&id, &[ReplicationStatus::Creating], ReplicationStatus::Error, e.to_string())
                    .await
                    .map(|_| ()),
            };
            if settled.is_ok() {
                info!("Replication {} create settled", id);
            }
            log_settle_failure("replication", &id, settled);
        });
        Ok(Accepted::running(pair, task))
    }

    async fn candidate(&self, ctx: &Context, volume_id: &str) -> Result<Volume> {
        let volume = self.engine.store().volumes().must_get(volume_id).await?;
        ctx.authorize(&volume)?;
        if !matches!(volume.status, VolumeStatus::Available | VolumeStatus::InUse) {
            return Err(Error::precondition(
                "volume",
                volume_id,
                format!("status is {}, expected available", volume.status),
            ));
        }
        if let Some(pair) = replication_data::replication_id(&volume.replication_driver_data) {
            return Err(Error::precondition(
                "volume",
                volume_id,
                format!("already replicated by {}", pair),
            ));
        }
        Ok(volume)
    }

    async fn side(&self, volume: Volume, primary: bool) -> Result<Side> {
        let (pool, dock) = self.engine.inventory().pool_and_dock(&volume.pool_id).await?;
        Ok(Side {
            volume,
            pool,
            dock,
            primary,
        })
    }

    /// Current sides of a pair, roles as recorded
    async fn sides(&self, pair: &ReplicationPair) -> Result<[Side; 2]> {
        let store = self.engine.store();
        let primary = store.volumes().must_get(&pair.primary_volume_id).await?;
        let secondary = store.volumes().must_get(&pair.secondary_volume_id).await?;
        Ok([self.side(primary, true).await?, self.side(secondary, false).await?])
    }

    /// Sides whose volumes still exist. A pair that never finished creating
    /// does not pin its volumes, so either may already be gone.
    async fn remaining_sides(&self, pair: &ReplicationPair) -> Result<Vec<Side>> {
        let volumes = self.engine.store().volumes();
        let mut sides = Vec::with_capacity(2);
        for (volume_id, primary) in [
            (&pair.primary_volume_id, true),
            (&pair.secondary_volume_id, false),
        ] {
            match volumes.get(volume_id).await? {
                Some(volume) => sides.push(self.side(volume, primary).await?),
                None => warn!(
                    "Replication {} volume {} is gone, skipping that side",
                    pair.base.id, volume_id
                ),
            }
        }
        Ok(sides)
    }

    fn operator(&self, pair: &ReplicationPair) -> Result<ReplicationOperatorRef> {
        operator_for(pair.replication_type, &self.engine).ok_or_else(|| {
            Error::Internal(format!(
                "replication {} has no replication type",
                pair.base.id
            ))
        })
    }

    /// Bridge, then create on the primary, then on the secondary
    async fn establish(
        &self,
        ctx: &Context,
        pair: &ReplicationPair,
        sides: &[Side; 2],
        operator: &ReplicationOperatorRef,
    ) -> Result<Established> {
        let mut bridges = [DriverData::new(), DriverData::new()];
        for (i, side) in sides.iter().enumerate() {
            match operator.attach(ctx, side).await {
                Ok(data) => bridges[i] = data,
                Err(e) => {
                    self.unbridge(ctx, operator, sides, &bridges).await;
                    return Err(e);
                }
            }
        }

        let volume_data_list = match operator.volume_data_list(ctx, [&sides[0], &sides[1]]).await {
            Ok(list) => list,
            Err(e) => {
                self.unbridge(ctx, operator, sides, &bridges).await;
                return Err(e);
            }
        };

        let mut staged = pair.clone();
        staged.primary_replication_driver_data = bridges[0].clone();
        staged.secondary_replication_driver_data = bridges[1].clone();
        staged.volume_data_list = volume_data_list.clone();

        let primary = match self.create_side(ctx, &staged, sides, true).await {
            Ok(result) => result,
            Err(e) => {
                self.unbridge(ctx, operator, sides, &bridges).await;
                return Err(e);
            }
        };
        let secondary = match self.create_side(ctx, &staged, sides, false).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Secondary create of replication {} failed, deleting the primary side",
                    pair.base.id
                );
                let opts = replication_opts(&staged, sides, true);
                if let Err(undo) = self.apply(ctx, &sides[0], Step::Delete, &opts).await {
                    warn!(
                        "Compensating delete of replication {} primary failed: {}",
                        pair.base.id, undo
                    );
                }
                self.unbridge(ctx, operator, sides, &bridges).await;
                return Err(e);
            }
        };

        let [mut primary_data, mut secondary_data] = bridges;
        for returned in [&primary, &secondary] {
            replication_data::merge_driver_entries(
                &mut primary_data,
                &returned.primary_replication_driver_data,
            );
            replication_data::merge_driver_entries(
                &mut secondary_data,
                &returned.secondary_replication_driver_data,
            );
        }
        Ok(Established {
            primary_data,
            secondary_data,
            volume_data_list,
        })
    }

    async fn create_side(
        &self,
        ctx: &Context,
        pair: &ReplicationPair,
        sides: &[Side; 2],
        primary: bool,
    ) -> Result<ReplicationResult> {
        let side = if primary { &sides[0] } else { &sides[1] };
        let opts = replication_opts(pair, sides, primary);
        let backend = side.backend();
        let manager = self.engine.manager();
        self.engine
            .invoke(ctx, backend, OP_CREATE_REPLICATION, async {
                let driver = manager.replication_driver(backend).await?;
                driver.create_replication(&opts).await
            })
            .await
    }

    /// Best-effort removal of bridges made during a failed create
    async fn unbridge(
        &self,
        ctx: &Context,
        operator: &ReplicationOperatorRef,
        sides: &[Side; 2],
        bridges: &[DriverData; 2],
    ) {
        for (side, data) in sides.iter().zip(bridges) {
            if let Err(e) = operator.detach(ctx, side, data).await {
                warn!(
                    "Could not remove bridge of {} volume {}: {}",
                    side.label(),
                    side.volume.base.id,
                    e
                );
            }
        }
    }

    async fn settle_created(
        &self,
        id: &str,
        sides: &[Side; 2],
        established: Established,
    ) -> Result<()> {
        let volumes = self.engine.store().volumes();
        for (side, data) in sides.iter().zip([&established.primary_data, &established.secondary_data]) {
            let peer = if side.primary { &sides[1] } else { &sides[0] };
            let mut markers = data.clone();
            markers.extend(replication_data::pair_markers(
                id,
                &peer.volume.base.id,
                side.primary,
            ));
            volumes
                .update(
                    &side.volume.base.id,
                    Box::new(move |v: &mut Volume| {
                        v.replication_driver_data.extend(markers);
                        Ok(())
                    }),
                )
                .await?;
        }

        self.engine
            .store()
            .replications()
            .transition_with(
                id,
                &[ReplicationStatus::Creating],
                ReplicationStatus::Available,
                Box::new(move |p: &mut ReplicationPair| {
                    p.primary_replication_driver_data = established.primary_data;
                    p.secondary_replication_driver_data = established.secondary_data;
                    p.volume_data_list = established.volume_data_list;
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a pair. Already deleting or absent pairs are a no-op.
    pub async fn delete_replication(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<ReplicationPair>>> {
        let store = self.engine.store();
        let Some(pair) = store.replications().get(id).await? else {
            debug!("Replication {} already removed", id);
            return Ok(Accepted::done(None));
        };
        if pair.status == ReplicationStatus::Deleting {
            return Ok(Accepted::done(Some(pair)));
        }
        let sides = self.remaining_sides(&pair).await?;
        let operator = self.operator(&pair)?;
        for side in &sides {
            self.engine.ensure_ready(side.backend(), DriverRole::Replication)?;
        }

        let pair = store
            .replications()
            .transition(
                id,
                &[
                    ReplicationStatus::Available,
                    ReplicationStatus::Enabled,
                    ReplicationStatus::Disabled,
                    ReplicationStatus::FailedOver,
                    ReplicationStatus::Error,
                    ReplicationStatus::ErrorDeleting,
                ],
                ReplicationStatus::Deleting,
            )
            .await?;
        info!("Replication {} deleting", id);

        let coordinator = self.clone();
        let task_ctx = ctx.clone();
        let record = pair.clone();
        let task = self.engine.spawn(ctx, OP_DELETE_REPLICATION, async move {
            let id = record.base.id.clone();
            let result = coordinator.dismantle(&task_ctx, &record, &sides, &operator).await;
            coordinator
                .engine
                .metrics()
                .operation("replication", "delete", result.is_ok());

            let store = coordinator.engine.store();
            match result {
                Ok(()) => match store.replications().delete(&id).await {
                    Ok(_) => info!("Replication {} deleted", id),
                    Err(e) => warn!("Could not remove replication record {}: {}", id, e),
                },
                Err(e) => {
                    let settled = store
                        .replications()
                        .fail(
                            &id,
                            &[ReplicationStatus::Deleting],
                            ReplicationStatus::ErrorDeleting,
                            e.to_string(),
                        )
                        .await;
                    log_settle_failure("replication", &id, settled.map(|_| ()));
                }
            }
        });
        Ok(Accepted::running(Some(pair), task))
    }

    /// Driver deletes on each remaining side, bridge teardown, then clear the volumes
    async fn dismantle(
        &self,
        ctx: &Context,
        pair: &ReplicationPair,
        sides: &[Side],
        operator: &ReplicationOperatorRef,
    ) -> Result<()> {
        self.both(ctx, pair, sides, Step::Delete).await?;

        for side in sides {
            operator
                .detach(ctx, side, &side.volume.replication_driver_data)
                .await?;
        }
        for side in sides {
            self.engine
                .store()
                .volumes()
                .update(
                    &side.volume.base.id,
                    Box::new(|v: &mut Volume| {
                        v.replication_driver_data.clear();
                        Ok(())
                    }),
                )
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Enable / Disable
    // =========================================================================

    pub async fn enable_replication(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<ReplicationPair>> {
        self.toggle(
            ctx,
            id,
            Step::Enable,
            &[ReplicationStatus::Available, ReplicationStatus::Disabled],
            ReplicationStatus::Enabling,
            ReplicationStatus::Enabled,
            None,
        )
        .await
    }

    pub async fn disable_replication(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<ReplicationPair>> {
        self.toggle(
            ctx,
            id,
            Step::Disable,
            &[ReplicationStatus::Enabled],
            ReplicationStatus::Disabling,
            ReplicationStatus::Available,
            Some(ReplicationStatus::Error),
        )
        .await
    }

    /// A `None` failure status rolls the pair back to where it started
    #[allow(clippy::too_many_arguments)]
    async fn toggle(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
        step: Step<'static>,
        from: &[ReplicationStatus],
        during: ReplicationStatus,
        success: ReplicationStatus,
        failure: Option<ReplicationStatus>,
    ) -> Result<Accepted<ReplicationPair>> {
        let store = self.engine.store();
        let pair = store.replications().must_get(id).await?;
        let started = pair.status;
        if !from.contains(&started) {
            return Err(Error::StatusConflict {
                kind: "replication".to_string(),
                id: id.to_string(),
                expected: from.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", "),
                actual: started.to_string(),
            });
        }
        let failure = failure.unwrap_or(started);
        let sides = self.sides(&pair).await?;
        for side in &sides {
            self.engine.ensure_ready(side.backend(), DriverRole::Replication)?;
        }

        let pair = store.replications().transition(id, &[started], during).await?;
        info!("Replication {} {}", id, during);

        let coordinator = self.clone();
        let task_ctx = ctx.clone();
        let record = pair.clone();
        let task = self.engine.spawn(ctx, step.operation(), async move {
            let id = record.base.id.clone();
            let result = coordinator.both(&task_ctx, &record, &sides, step).await;
            let label = match step {
                Step::Enable => "enable",
                _ => "disable",
            };
            coordinator
                .engine
                .metrics()
                .operation("replication", label, result.is_ok());

            let replications = coordinator.engine.store().replications();
            let settled = match result {
                Ok(()) => replications.transition(&id, &[during], success).await,
                Err(e) => replications.fail(&id, &[during], failure, e.to_string()).await,
            };
            if let Ok(pair) = &settled {
                info!("Replication {} settled as {}", id, pair.status);
            }
            log_settle_failure("replication", &id, settled.map(|_| ()));
        });
        Ok(Accepted::running(pair, task))
    }

    // =========================================================================
    // Failover
    // =========================================================================

    /// Fail over to the secondary; on success the roles are swapped
    pub async fn failover_replication(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
        request: FailoverRequest,
    ) -> Result<Accepted<ReplicationPair>> {
        let store = self.engine.store();
        let pair = store.replications().must_get(id).await?;
        let sides = self.sides(&pair).await?;

        if !request.allow_attached_volume && sides[0].volume.status == VolumeStatus::InUse {
            let attached = self
                .engine
                .live_attachments(&pair.primary_volume_id)
                .await?
                .into_iter()
                .filter(|a| a.purpose == AttachmentPurpose::User)
                .count();
            if attached > 0 {
                return Err(Error::precondition(
                    "replication",
                    id,
                    format!(
                        "primary volume {} is attached and attached failover is not allowed",
                        pair.primary_volume_id
                    ),
                ));
            }
        }
        for side in &sides {
            self.engine.ensure_ready(side.backend(), DriverRole::Replication)?;
        }

        let pair = store
            .replications()
            .transition(
                id,
                &[ReplicationStatus::Available, ReplicationStatus::Enabled],
                ReplicationStatus::Failovering,
            )
            .await?;
        info!("Replication {} failing over", id);

        let failover = FailoverOpts {
            allow_attached_volume: request.allow_attached_volume,
            secondary_backend_id: request.secondary_backend_id,
        };
        let coordinator = self.clone();
        let task_ctx = ctx.clone();
        let record = pair.clone();
        let task = self.engine.spawn(ctx, OP_FAILOVER_REPLICATION, async move {
            let id = record.base.id.clone();
            let result = coordinator
                .both(&task_ctx, &record, &sides, Step::Failover(&failover))
                .await;
            coordinator
                .engine
                .metrics()
                .operation("replication", "failover", result.is_ok());

            let settled = match result {
                Ok(()) => coordinator.swap_roles(&id, &sides).await,
                Err(e) => coordinator
                    .engine
                    .store()
                    .replications()
                    .fail(
                        &id,
                        &[ReplicationStatus::Failovering],
                        ReplicationStatus::Error,
                        e.to_string(),
                    )
                    .await
                    .map(|_| ()),
            };
            if settled.is_ok() {
                info!("Replication {} failover settled", id);
            }
            log_settle_failure("replication", &id, settled);
        });
        Ok(Accepted::running(pair, task))
    }

    async fn swap_roles(&self, id: &str, sides: &[Side; 2]) -> Result<()> {
        for side in sides {
            let now_primary = !side.primary;
            self.engine
                .store()
                .volumes()
                .update(
                    &side.volume.base.id,
                    Box::new(move |v: &mut Volume| {
                        replication_data::set_primary(&mut v.replication_driver_data, now_primary);
                        Ok(())
                    }),
                )
                .await?;
        }
        self.engine
            .store()
            .replications()
            .transition_with(
                id,
                &[ReplicationStatus::Failovering],
                ReplicationStatus::FailedOver,
                Box::new(|p: &mut ReplicationPair| {
                    std::mem::swap(&mut p.primary_volume_id, &mut p.secondary_volume_id);
                    std::mem::swap(
                        &mut p.primary_replication_driver_data,
                        &mut p.secondary_replication_driver_data,
                    );
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    // =========================================================================
    // Driver Calls
    // =========================================================================

    /// Apply a step to the primary, then the secondary
    async fn both(
        &self,
        ctx: &Context,
        pair: &ReplicationPair,
        sides: &[Side],
        step: Step<'_>,
    ) -> Result<()> {
        for side in sides {
            let opts = replication_opts(pair, sides, side.primary);
            self.apply(ctx, side, step, &opts).await.map_err(|e| {
                warn!(
                    "Replication {} {} failed on the {} side: {}",
                    pair.base.id,
                    step.operation(),
                    side.label(),
                    e
                );
                e
            })?;
        }
        Ok(())
    }

    async fn apply(
        &self,
        ctx: &Context,
        side: &Side,
        step: Step<'_>,
        opts: &ReplicationOpts,
    ) -> Result<()> {
        let backend = side.backend();
        let manager = self.engine.manager();
        self.engine
            .invoke(ctx, backend, step.operation(), async {
                let driver = manager.replication_driver(backend).await?;
                match step {
                    Step::Delete => driver.delete_replication(opts).await,
                    Step::Enable => driver.enable_replication(opts).await,
                    Step::Disable => driver.disable_replication(opts).await,
                    Step::Failover(failover) => driver.failover_replication(opts, failover).await,
                }
            })
            .await
    }
}

/// Options for one side's driver call
fn replication_opts(pair: &ReplicationPair, sides: &[Side], is_primary: bool) -> ReplicationOpts {
    let metadata = |primary: bool| {
        sides
            .iter()
            .find(|side| side.primary == primary)
            .map(|side| side.volume.metadata.clone())
            .unwrap_or_default()
    };
    ReplicationOpts {
        id: pair.base.id.clone(),
        name: pair.name.clone(),
        is_primary,
        primary_volume_id: pair.primary_volume_id.clone(),
        secondary_volume_id: pair.secondary_volume_id.clone(),
        primary_volume_metadata: metadata(true),
        secondary_volume_metadata: metadata(false),
        primary_replication_driver_data: pair.primary_replication_driver_data.clone(),
        secondary_replication_driver_data: pair.secondary_replication_driver_data.clone(),
        replication_mode: pair.replication_mode,
        replication_period: pair.replication_period,
        replication_bandwidth: pair.replication_bandwidth,
        availability_zone: pair.availability_zone.clone(),
        profile_id: pair.profile_id.clone(),
        volume_data_list: pair.volume_data_list.clone(),
    }
}
