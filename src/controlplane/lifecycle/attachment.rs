//! Attachment create / delete
//!
//! Attaching moves the volume through `attaching` and lands it in `inUse`;
//! a failed attach restores whatever status the volume had before.

use super::{log_settle_failure, LifecycleEngine};
use crate::controlplane::context::{Accepted, Context};
use crate::domain::model::{
    AccessProtocol, Attachment, AttachmentPurpose, AttachmentStatus, BaseModel, DriverData,
    HostInfo, Volume, VolumeStatus,
};
use crate::domain::ports::{
    ConnectionOpts, DriverRole, ListFilter, OP_INITIALIZE_CONNECTION, OP_TERMINATE_CONNECTION,
};
use crate::error::{Error, Result};
use crate::store::TableExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller intent for a new attachment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttachmentRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub volume_id: String,
    #[serde(default)]
    pub host_info: HostInfo,
    /// Defaults to the volume profile's protocol
    #[serde(default)]
    pub access_protocol: Option<AccessProtocol>,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub multipath: bool,
    #[serde(default)]
    pub metadata: DriverData,
}

/// Attachments that hold or may hold a host connection
pub(crate) fn is_live(attachment: &Attachment) -> bool {
    attachment.status != AttachmentStatus::Error
}

/// Volume statuses an attach may start from. A single-attach volume must be
/// idle at the moment of the transition, not only when it was loaded.
fn attachable_from(volume: &Volume) -> &'static [VolumeStatus] {
    if volume.multi_attach {
        &[VolumeStatus::Available, VolumeStatus::InUse]
    } else {
        &[VolumeStatus::Available]
    }
}

impl LifecycleEngine {
    pub async fn create_attachment(
        self: &Arc<Self>,
        ctx: &Context,
        request: CreateAttachmentRequest,
    ) -> Result<Accepted<Attachment>> {
        self.attach(ctx, request, AttachmentPurpose::User).await
    }

    /// Attach on behalf of a user or the replication coordinator
    pub(crate) async fn attach(
        self: &Arc<Self>,
        ctx: &Context,
        request: CreateAttachmentRequest,
        purpose: AttachmentPurpose,
    ) -> Result<Accepted<Attachment>> {
        if let Some(id) = request.id.as_deref() {
            if let Some(existing) = self.store.attachments().get(id).await? {
                ctx.authorize(&existing)?;
                return Ok(Accepted::done(existing));
            }
        }

        let volume = self.store.volumes().must_get(&request.volume_id).await?;
        let volume_id = volume.base.id.clone();
        if !volume.multi_attach {
            let live = self.live_attachments(&volume_id).await?;
            if !live.is_empty() || volume.status == VolumeStatus::InUse {
                return Err(Error::precondition(
                    "volume",
                    &volume_id,
                    "is single-attach and already attached",
                ));
            }
        }

        let access_protocol = match request.access_protocol {
            Some(protocol) => Some(protocol),
            None => self
                .store
                .profiles()
                .get(&volume.profile_id)
                .await?
                .and_then(|p| p.properties.access_protocol),
        };
        let pool = self.pool_of(&volume).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;

        let prior = volume.status;
        self.store
            .volumes()
            .transition(&volume_id, attachable_from(&volume), VolumeStatus::Attaching)
            .await?;

        let attachment = Attachment {
            base: BaseModel::new(request.id, &ctx.tenant_id, &ctx.user_id),
            volume_id: volume_id.clone(),
            host_info: request.host_info,
            access_protocol,
            driver_volume_type: String::new(),
            connection_data: Default::default(),
            mountpoint: request.mountpoint,
            multipath: request.multipath,
            status: AttachmentStatus::Creating,
            purpose,
            prior_volume_status: Some(prior),
            metadata: request.metadata,
            error_reason: None,
        };
        let attachment = match self.store.attachments().create(attachment).await {
            Ok(attachment) => attachment,
            Err(e) => {
                let restored = self
                    .store
                    .volumes()
                    .transition(&volume_id, &[VolumeStatus::Attaching], prior)
                    .await;
                log_settle_failure("volume", &volume_id, restored.map(|_| ()));
                return Err(e);
            }
        };
        info!(
            "Attachment {} accepted for volume {} on host {}",
            attachment.base.id, volume_id, attachment.host_info.host
        );

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = attachment.clone();
        let task = self.spawn(ctx, OP_INITIALIZE_CONNECTION, async move {
            engine.drive_attach(&task_ctx, record, volume).await;
        });
        Ok(Accepted::running(attachment, task))
    }

    pub(crate) async fn live_attachments(&self, volume_id: &str) -> Result<Vec<Attachment>> {
        let filter = ListFilter::new().field("volumeId", volume_id);
        Ok(self
            .store
            .attachments()
            .list(&filter)
            .await?
            .into_iter()
            .filter(is_live)
            .collect())
    }

    /// Backend and options for a connect or disconnect of `attachment`
    async fn connection_opts(
        &self,
        attachment: &Attachment,
        volume: &Volume,
    ) -> Result<(String, ConnectionOpts)> {
        let pool = self.pool_of(volume).await?;
        let opts = ConnectionOpts {
            attachment_id: attachment.base.id.clone(),
            volume_id: volume.base.id.clone(),
            pool_name: pool.name,
            host_info: attachment.host_info.clone(),
            access_protocol: attachment.access_protocol,
            multipath: attachment.multipath,
            volume_metadata: volume.metadata.clone(),
            connection_data: attachment.connection_data.clone(),
        };
        Ok((pool.backend_name, opts))
    }

    async fn drive_attach(&self, ctx: &Context, attachment: Attachment, volume: Volume) {
        let id = attachment.base.id.clone();
        let volume_id = volume.base.id.clone();
        let prior = attachment.prior_volume_status.unwrap_or(VolumeStatus::Available);

        let result = async {
            self.store
                .attachments()
                .transition(&id, &[AttachmentStatus::Creating], AttachmentStatus::Attaching)
                .await?;
            let (backend, opts) = self.connection_opts(&attachment, &volume).await?;
            let info = self
                .invoke(ctx, &backend, OP_INITIALIZE_CONNECTION, async {
                    let driver = self.manager.volume_driver(&backend).await?;
                    driver.initialize_connection(&opts).await
                })
                .await;
            if info.is_err() {
                // Undo whatever half-made connection the driver left behind
                let terminated = self
                    .invoke(ctx, &backend, OP_TERMINATE_CONNECTION, async {
                        let driver = self.manager.volume_driver(&backend).await?;
                        driver.terminate_connection(&opts).await
                    })
                    .await;
                if let Err(e) = terminated {
                    debug!("Best-effort terminate of {} failed: {}", id, e);
                }
            }
            info
        }
        .await;

        self.metrics.operation("attachment", "create", result.is_ok());
        match result {
            Ok(info) => {
                let settled = self
                    .store
                    .attachments()
                    .transition_with(
                        &id,
                        &[AttachmentStatus::Attaching],
                        AttachmentStatus::Available,
                        Box::new(move |a: &mut Attachment| {
                            a.driver_volume_type = info.driver_volume_type;
                            a.connection_data = info.connection_data;
                            Ok(())
                        }),
                    )
                    .await;
                log_settle_failure("attachment", &id, settled.map(|_| ()));
                let settled = self
                    .store
                    .volumes()
                    .transition(&volume_id, &[VolumeStatus::Attaching], VolumeStatus::InUse)
                    .await;
                if settled.is_ok() {
                    info!("Attachment {} available, volume {} in use", id, volume_id);
                }
                log_settle_failure("volume", &volume_id, settled.map(|_| ()));
            }
            Err(e) => {
                let settled = self
                    .store
                    .volumes()
                    .transition(&volume_id, &[VolumeStatus::Attaching], prior)
                    .await;
                log_settle_failure("volume", &volume_id, settled.map(|_| ()));
                let settled = self
                    .store
                    .attachments()
                    .fail(
                        &id,
                        &[AttachmentStatus::Creating, AttachmentStatus::Attaching],
                        AttachmentStatus::Error,
                        e.to_string(),
                    )
                    .await;
                log_settle_failure("attachment", &id, settled.map(|_| ()));
            }
        }
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Tear down an attachment. Absent attachments are a no-op.
    pub async fn delete_attachment(
        self: &Arc<Self>,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<Attachment>>> {
        let Some(attachment) = self.store.attachments().get(id).await? else {
            debug!("Attachment {} already removed", id);
            return Ok(Accepted::done(None));
        };
        if matches!(
            attachment.status,
            AttachmentStatus::Creating | AttachmentStatus::Attaching
        ) {
            return Err(Error::precondition(
                "attachment",
                id,
                format!("cannot detach while {}", attachment.status),
            ));
        }
        let volume = self.store.volumes().must_get(&attachment.volume_id).await?;
        let pool = self.pool_of(&volume).await?;
        self.ensure_ready(&pool.backend_name, DriverRole::Provision)?;
        info!("Attachment {} detaching from volume {}", id, volume.base.id);

        let engine = self.clone();
        let task_ctx = ctx.clone();
        let record = attachment.clone();
        let task = self.spawn(ctx, OP_TERMINATE_CONNECTION, async move {
            engine.drive_detach(&task_ctx, record, volume).await;
        });
        Ok(Accepted::running(Some(attachment), task))
    }

    async fn drive_detach(&self, ctx: &Context, attachment: Attachment, volume: Volume) {
        let id = attachment.base.id.clone();
        let volume_id = volume.base.id.clone();

        let result = async {
            let (backend, opts) = self.connection_opts(&attachment, &volume).await?;
            self.invoke(ctx, &backend, OP_TERMINATE_CONNECTION, async {
                let driver = self.manager.volume_driver(&backend).await?;
                driver.terminate_connection(&opts).await
            })
            .await
        }
        .await;

        self.metrics.operation("attachment", "delete", result.is_ok());
        if let Err(e) = result {
            let settled = self
                .store
                .attachments()
                .fail(
                    &id,
                    &[
                        AttachmentStatus::Available,
                        AttachmentStatus::Error,
                        AttachmentStatus::ErrorDeleting,
                    ],
                    AttachmentStatus::ErrorDeleting,
                    e.to_string(),
                )
                .await;
            log_settle_failure("attachment", &id, settled.map(|_| ()));
            return;
        }

        if let Err(e) = self.store.attachments().delete(&id).await {
            warn!("Could not remove attachment record {}: {}", id, e);
            return;
        }
        info!("Attachment {} removed", id);

        match self.live_attachments(&volume_id).await {
            Ok(remaining) if remaining.is_empty() => {
                let settled = self
                    .store
                    .volumes()
                    .transition(&volume_id, &[VolumeStatus::InUse], VolumeStatus::Available)
                    .await;
                if let Err(e) = settled {
                    debug!("Volume {} left as is after detach: {}", volume_id, e);
                }
            }
            Ok(remaining) => debug!(
                "Volume {} still has {} attachments",
                volume_id,
                remaining.len()
            ),
            Err(e) => warn!("Could not list attachments of {}: {}", volume_id, e),
        }
    }
}
