//! Snapshot create / delete

use super::{log_settle_failure, LifecycleEngine};
use crate::controlplane::context::{Accepted, Context};
use crate::domain::model::{BaseModel, DriverData, Snapshot, SnapshotStatus, VolumeStatus};
use crate::domain::ports::{
    CreateSnapshotOpts, DeleteSnapshotOpts, DriverRole, OP_CREATE_SNAPSHOT, OP_DELETE_SNAPSHOT,
};
use crate::error::{Error, Result};
use crate::store::TableExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller intent for a new snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub volume_id: String,
    #[serde(default)]
    pub metadata: DriverData,
}

impl LifecycleEngine {
    pub async fn create_snapshot(
        self: &Arc<Self>,
        ctx: &Context,
        request: CreateSnapshotRequest,
    ) -> Result<Accepted<Snapshot>> {
        if let Some(id) = request.id.as_deref() {
            if let Some(existing) = self.store.snapshots().get(id).await? {
                ctx.authorize(&existing)?;
                return Ok(Accepted::done(existing));
            }
        }

        let volume = self.store.volumes().must_get(&request.volume_id).await?;
        if !matches!(volume.status, VolumeStatus::Available | VolumeStatus::InUse) {
            return Err(Error::precondition(
                "volume",
                &volume.base.id,
                format!("cannot snapshot a volume in status {}", volume.status),
            ));
        }
        let pool = self.pool_of(&volume).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;

        let snapshot = Snapshot {
            base: BaseModel::new(request.id, &ctx.tenant_id, &ctx.user_id),
            name: request.name,
            description: request.description,
            volume_id: volume.base.id.clone(),
            size: volume.size,
            status: SnapshotStatus::Creating,
            metadata: request.metadata,
            error_reason: None,
        };
        let snapshot = self.store.snapshots().create(snapshot).await?;
        info!(
            "Snapshot {} of volume {} accepted ({} GiB)",
            snapshot.base.id, volume.base.id, snapshot.size
        );

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = snapshot.clone();
        let task = self.spawn(ctx, OP_CREATE_SNAPSHOT, async move {
            let id = record.base.id.clone();
            let result = async {
                let opts = CreateSnapshotOpts {
                    id: id.clone(),
                    name: record.name.clone(),
                    description: record.description.clone(),
                    volume_id: volume.base.id.clone(),
                    pool_name: pool.name.clone(),
                    size: record.size,
                    volume_metadata: volume.metadata.clone(),
                    metadata: record.metadata.clone(),
                };
                let backend = pool.backend_name.as_str();
                engine
                    .invoke(&task_ctx, backend, OP_CREATE_SNAPSHOT, async {
                        let driver = engine.manager.volume_driver(backend).await?;
                        driver.create_snapshot(&opts).await
                    })
                    .await
            }
            .await;

            engine.metrics.operation("snapshot", "create", result.is_ok());
            let settled = match result {
                Ok(returned) => {
                    engine
                        .store
                        .snapshots()
                        .transition_with(
                            &id,
                            &[SnapshotStatus::Creating],
                            SnapshotStatus::Available,
                            Box::new(move |s: &mut Snapshot| {
                                s.metadata.extend(returned.metadata);
                                Ok(())
                            }),
                        )
                        .await
                }
                Err(e) => {
                    engine
                        .store
                        .snapshots()
                        .fail(&id, &[SnapshotStatus::Creating], SnapshotStatus::Error, e.to_string())
                        .await
                }
            };
            if let Ok(snapshot) = &settled {
                info!("Snapshot {} settled as {}", id, snapshot.status);
            }
            log_settle_failure("snapshot", &id, settled.map(|_| ()));
        });
        Ok(Accepted::running(snapshot, task))
    }

    /// Delete a snapshot. Already deleting or absent snapshots are a no-op.
    pub async fn delete_snapshot(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<Snapshot>>> {
        let Some(snapshot) = self.store.snapshots().get(id).await? else {
            debug!("Snapshot {} already removed", id);
            return Ok(Accepted::done(None));
        };
        if snapshot.status == SnapshotStatus::Deleting {
            return Ok(Accepted::done(Some(snapshot)));
        }
        let volume = self.store.volumes().must_get(&snapshot.volume_id).await?;
        let pool = self.pool_of(&volume).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;

        let snapshot = self
            .store
            .snapshots()
            .transition(
                id,
                &[
                    SnapshotStatus::Available,
                    SnapshotStatus::Error,
                    SnapshotStatus::ErrorDeleting,
                ],
                SnapshotStatus::Deleting,
            )
            .await?;
        info!("Snapshot {} deleting", id);

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = snapshot.clone();
        let task = self.spawn(ctx, OP_DELETE_SNAPSHOT, async move {
            let id = record.base.id.clone();
            let opts = DeleteSnapshotOpts {
                id: id.clone(),
                volume_id: record.volume_id.clone(),
                pool_name: pool.name.clone(),
                metadata: record.metadata.clone(),
            };
            let backend = pool.backend_name.as_str();
            let result = engine
                .invoke(&task_ctx, backend, OP_DELETE_SNAPSHOT, async {
                    let driver = engine.manager.volume_driver(backend).await?;
                    driver.delete_snapshot(&opts).await
                })
                .await;

            engine.metrics.operation("snapshot", "delete", result.is_ok());
            match result {
                Ok(()) => match engine.store.snapshots().delete(&id).await {
                    Ok(_) => info!("Snapshot {} deleted", id),
                    Err(e) => warn!("Could not remove snapshot record {}: {}", id, e),
                },
                Err(e) => {
                    let settled = engine
                        .store
                        .snapshots()
                        .fail(
                            &id,
                            &[SnapshotStatus::Deleting],
                            SnapshotStatus::ErrorDeleting,
                            e.to_string(),
                        )
                        .await;
                    log_settle_failure("snapshot", &id, settled.map(|_| ()));
                }
            }
        });
        Ok(Accepted::running(Some(snapshot), task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::lifecycle::CreateVolumeRequest;
    use crate::controlplane::testing::Harness;
    use crate::domain::ports::OP_CREATE_VOLUME;
    use crate::drivers::sample::Fault;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_snapshot_takes_volume_size() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        let volume = h.volume(&ctx, "v1", 3).await;

        let accepted = h
            .engine
            .create_snapshot(
                &ctx,
                CreateSnapshotRequest {
                    name: "s1".into(),
                    volume_id: volume.base.id.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(accepted.record.status, SnapshotStatus::Creating);
        let snapshot = accepted.join().await.unwrap();

        let stored = h.store.snapshots().must_get(&snapshot.base.id).await.unwrap();
        assert_eq!(stored.status, SnapshotStatus::Available);
        assert_eq!(stored.size, 3);
        assert_eq!(stored.metadata.get("poolName").map(String::as_str), Some("b1-pool"));
    }

    #[tokio::test]
    async fn test_delete_and_redrive_from_error_deleting() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        let volume = h.volume(&ctx, "v1", 1).await;
        let snapshot = h.snapshot(&ctx, &volume.base.id, "s1").await;

        h.driver("b1").inject(Fault::Fail(OP_DELETE_SNAPSHOT));
        h.engine.delete_snapshot(&ctx, "s1").await.unwrap().join().await.unwrap();
        let stored = h.store.snapshots().must_get("s1").await.unwrap();
        assert_eq!(stored.status, SnapshotStatus::ErrorDeleting);

        h.driver("b1").clear_faults();
        h.engine.delete_snapshot(&ctx, &snapshot.base.id).await.unwrap().join().await.unwrap();
        assert!(h.store.snapshots().get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_requires_usable_volume() {
        let h = Harness::new().await;
        let ctx = h.ctx();
        h.driver("b1").inject(Fault::Fail(OP_CREATE_VOLUME));
        h.driver("b2").inject(Fault::Fail(OP_CREATE_VOLUME));
        let broken = h
            .engine
            .create_volume(
                &ctx,
                CreateVolumeRequest {
                    name: "broken".into(),
                    size: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .join()
            .await
            .unwrap();

        let err = h
            .engine
            .create_snapshot(
                &ctx,
                CreateSnapshotRequest {
                    name: "s".into(),
                    volume_id: broken.base.id.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::Precondition { .. });
    }
}
