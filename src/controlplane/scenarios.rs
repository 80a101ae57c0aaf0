//! End-to-end control plane scenarios over the sample driver

use super::context::Context;
use super::controller::CreateProfileRequest;
use super::lifecycle::{CreateAttachmentRequest, CreateSnapshotRequest, CreateVolumeRequest};
use super::replication::{CreateReplicationRequest, FailoverRequest};
use super::testing::Harness;
use crate::domain::model::{
    AttachmentStatus, HostInfo, LifecycleStatus, Pool, ProfileProperties, ReplicationStatus,
    ReplicationType, StorageType, VolumeStatus,
};
use crate::domain::ports::{
    ListFilter, OP_CREATE_REPLICATION, OP_CREATE_VOLUME, OP_DELETE_REPLICATION,
};
use crate::domain::replication_data;
use crate::drivers::sample::Fault;
use crate::error::Error;
use crate::store::TableExt;
use assert_matches::assert_matches;

fn attach_to(volume_id: &str, host: &str) -> CreateAttachmentRequest {
    CreateAttachmentRequest {
        volume_id: volume_id.into(),
        host_info: HostInfo {
            host: host.into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn set_free(h: &Harness, pool_id: &str, free: u64) {
    h.store
        .pools()
        .update(
            pool_id,
            Box::new(move |p: &mut Pool| {
                p.free_capacity = free;
                Ok(())
            }),
        )
        .await
        .unwrap();
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn s1_provision_and_extend() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let pool_a = h.pool_id("b1");
    let gold = h
        .controller
        .create_profile(
            &Context::admin(),
            CreateProfileRequest {
                name: "gold".into(),
                storage_type: StorageType::Block,
                properties: ProfileProperties {
                    pool_id: Some(pool_a.clone()),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let accepted = h
        .controller
        .create_volume(
            &ctx,
            CreateVolumeRequest {
                name: "v1".into(),
                size: 1,
                profile_id: Some(gold.base.id.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(accepted.record.status, VolumeStatus::Creating);
    let id = accepted.join().await.unwrap().base.id;

    let v1 = h.controller.get_volume(&ctx, &id).await.unwrap();
    assert_eq!(v1.status, VolumeStatus::Available);
    assert_eq!(v1.pool_id, pool_a);
    assert_eq!(h.pool(&pool_a).await.free_capacity, 99);

    let accepted = h.controller.extend_volume(&ctx, &id, 5).await.unwrap();
    assert_eq!(accepted.record.status, VolumeStatus::Extending);
    accepted.join().await.unwrap();

    let v1 = h.controller.get_volume(&ctx, &id).await.unwrap();
    assert_eq!(v1.status, VolumeStatus::Available);
    assert_eq!(v1.size, 5);
    assert_eq!(h.pool(&pool_a).await.free_capacity, 95);
}

#[tokio::test]
async fn s2_single_attach_enforcement() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let v1 = h.volume(&ctx, "v1", 1).await;
    assert!(!v1.multi_attach);

    h.controller
        .create_attachment(&ctx, attach_to(&v1.base.id, "h1"))
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    let v1 = h.controller.get_volume(&ctx, &v1.base.id).await.unwrap();
    assert_eq!(v1.status, VolumeStatus::InUse);

    assert_matches!(
        h.controller
            .create_attachment(&ctx, attach_to(&v1.base.id, "h2"))
            .await,
        Err(Error::Precondition { .. })
    );
    let attachments = h
        .controller
        .list_attachments(&ctx, ListFilter::new().field("volumeId", &v1.base.id))
        .await
        .unwrap();
    assert_eq!(attachments.len(), 1);
}

#[tokio::test]
async fn s3_snapshot_blocks_delete() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let v1 = h.volume(&ctx, "v1", 2).await;
    h.snapshot(&ctx, &v1.base.id, "s1").await;

    let err = h.controller.delete_volume(&ctx, &v1.base.id).await.unwrap_err();
    assert_matches!(&err, Error::Precondition { reason, .. } if reason.contains("s1"));

    h.controller
        .delete_snapshot(&ctx, "s1")
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    assert!(h.store.snapshots().get("s1").await.unwrap().is_none());

    h.controller
        .delete_volume(&ctx, &v1.base.id)
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    assert!(h.store.volumes().get(&v1.base.id).await.unwrap().is_none());
}

#[tokio::test]
async fn s4_array_replication_create_and_failover() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let pv = h.volume_on(&ctx, "b1", "pv", 10).await;
    let sv = h.volume_on(&ctx, "b2", "sv", 10).await;

    let pair = h
        .controller
        .create_replication(
            &ctx,
            CreateReplicationRequest {
                name: "r1".into(),
                primary_volume_id: pv.base.id.clone(),
                secondary_volume_id: sv.base.id.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    let id = pair.base.id.clone();

    let pair = h.controller.get_replication(&ctx, &id).await.unwrap();
    assert_eq!(pair.status, ReplicationStatus::Available);
    let pv_data = h.store.volumes().must_get(&pv.base.id).await.unwrap().replication_driver_data;
    let sv_data = h.store.volumes().must_get(&sv.base.id).await.unwrap().replication_driver_data;
    assert_eq!(replication_data::is_primary(&pv_data), Some(true));
    assert_eq!(replication_data::is_primary(&sv_data), Some(false));

    h.controller
        .failover_replication(
            &ctx,
            &id,
            FailoverRequest {
                allow_attached_volume: false,
                secondary_backend_id: "default".into(),
            },
        )
        .await
        .unwrap()
        .join()
        .await
        .unwrap();

    let pair = h.controller.get_replication(&ctx, &id).await.unwrap();
    assert_eq!(pair.status, ReplicationStatus::FailedOver);
    assert_eq!(pair.primary_volume_id, sv.base.id);
    assert_eq!(pair.secondary_volume_id, pv.base.id);
    let pv_data = h.store.volumes().must_get(&pv.base.id).await.unwrap().replication_driver_data;
    assert_eq!(replication_data::is_primary(&pv_data), Some(false));
}

#[tokio::test]
async fn s5_host_replication_rollback() {
    let h = Harness::with_replication(ReplicationType::Host).await;
    let ctx = h.ctx();
    let pv = h.volume_on(&ctx, "b1", "pv", 3).await;
    let sv = h.volume_on(&ctx, "b2", "sv", 3).await;
    h.driver("b2").inject(Fault::FailSide {
        operation: OP_CREATE_REPLICATION,
        primary: false,
    });

    let pair = h
        .controller
        .create_replication(
            &ctx,
            CreateReplicationRequest {
                name: "r1".into(),
                primary_volume_id: pv.base.id.clone(),
                secondary_volume_id: sv.base.id.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .join()
        .await
        .unwrap();

    let pair = h.controller.get_replication(&ctx, &pair.base.id).await.unwrap();
    assert_eq!(pair.status, ReplicationStatus::Error);
    assert!(pair.error_reason.is_some());

    let primary_ops: Vec<_> = h
        .driver("b1")
        .journal()
        .into_iter()
        .filter(|c| c.primary.is_some())
        .map(|c| c.operation)
        .collect();
    assert_eq!(primary_ops, vec![OP_CREATE_REPLICATION, OP_DELETE_REPLICATION]);

    // Both bridges are gone and the volumes are free again
    assert!(h
        .store
        .attachments()
        .list(&ListFilter::new())
        .await
        .unwrap()
        .is_empty());
    for id in [&pv.base.id, &sv.base.id] {
        let volume = h.store.volumes().must_get(id).await.unwrap();
        assert_eq!(volume.status, VolumeStatus::Available);
        assert!(volume.replication_driver_data.is_empty());
    }
}

#[tokio::test]
async fn s6_scheduler_prefers_free_capacity() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let (pool_a, pool_b) = (h.pool_id("b1"), h.pool_id("b2"));
    set_free(&h, &pool_a, 5).await;
    set_free(&h, &pool_b, 50).await;

    let volume = h.volume(&ctx, "v1", 10).await;
    assert_eq!(volume.pool_id, pool_b);
    assert_eq!(h.pool(&pool_b).await.free_capacity, 40);
    assert_eq!(h.pool(&pool_a).await.free_capacity, 5);
}

// =============================================================================
// Invariants
// =============================================================================

#[tokio::test]
async fn volumes_have_positive_size() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    assert_matches!(
        h.controller
            .create_volume(
                &ctx,
                CreateVolumeRequest {
                    name: "empty".into(),
                    size: 0,
                    ..Default::default()
                },
            )
            .await,
        Err(Error::Validation(_))
    );
    h.volume(&ctx, "v1", 1).await;
    h.driver("b1").inject(Fault::Fail(OP_CREATE_VOLUME));
    h.driver("b2").inject(Fault::Fail(OP_CREATE_VOLUME));
    h.volume(&ctx, "v2", 2).await;

    let volumes = h.store.volumes().list(&ListFilter::new()).await.unwrap();
    assert_eq!(volumes.len(), 2);
    assert!(volumes.iter().all(|v| v.size > 0));
    assert!(volumes
        .iter()
        .any(|v| v.status == VolumeStatus::Error && v.error_reason.is_some()));
}

#[tokio::test]
async fn concurrent_attaches_leave_one_connection() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let volume = h.volume(&ctx, "v1", 1).await;

    let (a, b) = tokio::join!(
        h.controller.create_attachment(&ctx, attach_to(&volume.base.id, "h1")),
        h.controller.create_attachment(&ctx, attach_to(&volume.base.id, "h2")),
    );
    for accepted in [a, b].into_iter().flatten() {
        accepted.join().await.unwrap();
    }

    let available = h
        .store
        .attachments()
        .list(&ListFilter::new().field("volumeId", &volume.base.id))
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.status == AttachmentStatus::Available)
        .count();
    assert_eq!(available, 1);
}

#[tokio::test]
async fn snapshot_keeps_size_at_creation() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let volume = h.volume(&ctx, "v1", 2).await;
    let snapshot = h.snapshot(&ctx, &volume.base.id, "s1").await;
    assert_eq!(snapshot.size, 2);

    h.controller
        .extend_volume(&ctx, &volume.base.id, 6)
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    let snapshot = h.controller.get_snapshot(&ctx, "s1").await.unwrap();
    assert_eq!(snapshot.size, 2);
}

#[tokio::test]
async fn replication_requires_matching_sides() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let pv = h.volume_on(&ctx, "b1", "pv", 4).await;
    let sv = h.volume_on(&ctx, "b2", "sv", 8).await;
    assert_matches!(
        h.controller
            .create_replication(
                &ctx,
                CreateReplicationRequest {
                    name: "r1".into(),
                    primary_volume_id: pv.base.id.clone(),
                    secondary_volume_id: sv.base.id.clone(),
                    ..Default::default()
                },
            )
            .await,
        Err(Error::Validation(_))
    );
    assert!(h
        .store
        .replications()
        .list(&ListFilter::new())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn deletes_are_idempotent() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let volume = h.volume(&ctx, "v1", 1).await;
    h.snapshot(&ctx, &volume.base.id, "s1").await;

    for _ in 0..2 {
        h.controller
            .delete_snapshot(&ctx, "s1")
            .await
            .unwrap()
            .join()
            .await
            .unwrap();
    }
    for _ in 0..2 {
        h.controller
            .delete_volume(&ctx, &volume.base.id)
            .await
            .unwrap()
            .join()
            .await
            .unwrap();
    }
    assert!(h.controller.delete_attachment(&ctx, "gone").await.unwrap().is_settled());
    assert!(h.controller.delete_group(&ctx, "gone").await.unwrap().is_settled());
    assert!(h.controller.delete_replication(&ctx, "gone").await.unwrap().is_settled());
    assert_eq!(h.driver("b1").volume_count() + h.driver("b2").volume_count(), 0);
}

#[tokio::test]
async fn deleting_record_is_not_redriven() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let volume = h.volume(&ctx, "v1", 1).await;
    h.store
        .volumes()
        .transition(&volume.base.id, &[VolumeStatus::Available], VolumeStatus::Deleting)
        .await
        .unwrap();

    let accepted = h.controller.delete_volume(&ctx, &volume.base.id).await.unwrap();
    assert!(accepted.is_settled());
    assert_eq!(
        accepted.join().await.unwrap().map(|v| v.status),
        Some(VolumeStatus::Deleting)
    );
}

#[tokio::test]
async fn creates_are_idempotent_per_id() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let request = CreateVolumeRequest {
        id: Some("v1".into()),
        name: "v1".into(),
        size: 1,
        ..Default::default()
    };
    h.controller
        .create_volume(&ctx, request.clone())
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    h.controller
        .create_volume(&ctx, request)
        .await
        .unwrap()
        .join()
        .await
        .unwrap();

    let snapshot = CreateSnapshotRequest {
        id: Some("s1".into()),
        name: "s1".into(),
        volume_id: "v1".into(),
        ..Default::default()
    };
    for _ in 0..2 {
        h.controller
            .create_snapshot(&ctx, snapshot.clone())
            .await
            .unwrap()
            .join()
            .await
            .unwrap();
    }

    assert_eq!(h.store.volumes().list(&ListFilter::new()).await.unwrap().len(), 1);
    assert_eq!(h.store.snapshots().list(&ListFilter::new()).await.unwrap().len(), 1);
    assert_eq!(h.driver("b1").volume_count() + h.driver("b2").volume_count(), 1);
}

#[tokio::test]
async fn illegal_transitions_are_refused() {
    let h = Harness::new().await;
    let ctx = h.ctx();
    let volume = h.volume(&ctx, "v1", 1).await;

    assert!(!VolumeStatus::Available.can_transition_to(VolumeStatus::Creating));
    assert_matches!(
        h.store
            .volumes()
            .transition(&volume.base.id, &[VolumeStatus::Available], VolumeStatus::Creating)
            .await,
        Err(Error::Internal(_))
    );
    assert_matches!(
        h.store
            .volumes()
            .transition(&volume.base.id, &[VolumeStatus::Extending], VolumeStatus::Available)
            .await,
        Err(Error::StatusConflict { .. })
    );
    assert!(!ReplicationStatus::Creating.can_transition_to(ReplicationStatus::Enabled));
}

#[tokio::test]
async fn exactly_one_side_is_primary() {
    let h = Harness::with_replication(ReplicationType::Host).await;
    let ctx = h.ctx();
    let pv = h.volume_on(&ctx, "b1", "pv", 1).await;
    let sv = h.volume_on(&ctx, "b2", "sv", 1).await;
    h.controller
        .create_replication(
            &ctx,
            CreateReplicationRequest {
                name: "r1".into(),
                primary_volume_id: pv.base.id.clone(),
                secondary_volume_id: sv.base.id.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .join()
        .await
        .unwrap();

    let mut primaries = 0;
    for id in [&pv.base.id, &sv.base.id] {
        let data = h.store.volumes().must_get(id).await.unwrap().replication_driver_data;
        match replication_data::is_primary(&data) {
            Some(true) => primaries += 1,
            Some(false) => {}
            None => panic!("volume {} carries no IsPrimary marker", id),
        }
    }
    assert_eq!(primaries, 1);
}
