//! Replication operators
//!
//! The driver calls of a pair are the same for every replication type. What
//! differs is the preparation around them: host-based replication needs each
//! volume attached to the dock that runs the replication mover, and the mover
//! is told about every replicated volume in the tenant's catalogue.

use crate::controlplane::context::Context;
use crate::controlplane::lifecycle::{CreateAttachmentRequest, LifecycleEngine};
use crate::domain::model::{
    AttachmentPurpose, AttachmentStatus, Dock, DriverData, HostInfo, Pool, ReplicationType,
    Volume, VolumeDataEntry,
};
use crate::domain::ports::ListFilter;
use crate::domain::replication_data;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// One side of a pair with the records its calls need
#[derive(Debug, Clone)]
pub struct Side {
    pub volume: Volume,
    pub pool: Pool,
    pub dock: Dock,
    pub primary: bool,
}

impl Side {
    pub fn backend(&self) -> &str {
        &self.pool.backend_name
    }

    pub fn label(&self) -> &'static str {
        if self.primary {
            "primary"
        } else {
            "secondary"
        }
    }
}

/// Type-specific steps around the replication driver calls
#[async_trait]
pub trait ReplicationOperator: Send + Sync {
    fn replication_type(&self) -> ReplicationType;

    /// Prepare a side before the driver create. Returned entries are recorded
    /// in that side's replication driver data.
    async fn attach(&self, ctx: &Context, side: &Side) -> Result<DriverData>;

    /// Undo [`attach`](Self::attach) given the side's recorded driver data
    async fn detach(&self, ctx: &Context, side: &Side, driver_data: &DriverData) -> Result<()>;

    /// Volume list forwarded to the driver with every call
    async fn volume_data_list(&self, ctx: &Context, sides: [&Side; 2])
        -> Result<Vec<VolumeDataEntry>>;
}

pub type ReplicationOperatorRef = Arc<dyn ReplicationOperator>;

/// Operator for a replication type, `None` when the type cannot replicate
pub fn operator_for(
    replication_type: ReplicationType,
    engine: &Arc<LifecycleEngine>,
) -> Option<ReplicationOperatorRef> {
    match replication_type {
        ReplicationType::Array => Some(Arc::new(ArrayBased)),
        ReplicationType::Host => Some(Arc::new(HostBased {
            engine: engine.clone(),
        })),
        ReplicationType::None => None,
    }
}

// =============================================================================
// Array-based
// =============================================================================

/// The array replicates; the control plane only issues commands
pub struct ArrayBased;

#[async_trait]
impl ReplicationOperator for ArrayBased {
    fn replication_type(&self) -> ReplicationType {
        ReplicationType::Array
    }

    async fn attach(&self, _ctx: &Context, _side: &Side) -> Result<DriverData> {
        Ok(DriverData::new())
    }

    async fn detach(&self, _ctx: &Context, _side: &Side, _driver_data: &DriverData) -> Result<()> {
        Ok(())
    }

    async fn volume_data_list(
        &self,
        _ctx: &Context,
        _sides: [&Side; 2],
    ) -> Result<Vec<VolumeDataEntry>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Host-based
// =============================================================================

/// A host-side mover copies data through bridging attachments
pub struct HostBased {
    engine: Arc<LifecycleEngine>,
}

fn data_entry(volume: &Volume) -> VolumeDataEntry {
    VolumeDataEntry {
        volume_id: volume.base.id.clone(),
        size: volume.size,
        pool_id: volume.pool_id.clone(),
        replication_driver_data: volume.replication_driver_data.clone(),
    }
}

#[async_trait]
impl ReplicationOperator for HostBased {
    fn replication_type(&self) -> ReplicationType {
        ReplicationType::Host
    }

    async fn attach(&self, ctx: &Context, side: &Side) -> Result<DriverData> {
        let request = CreateAttachmentRequest {
            volume_id: side.volume.base.id.clone(),
            host_info: HostInfo::from_dock(&side.dock),
            ..Default::default()
        };
        let accepted = self
            .engine
            .attach(ctx, request, AttachmentPurpose::ReplicationBridge)
            .await?;
        let attachment_id = accepted.join().await?.base.id;

        let attachment = self.engine.store().attachments().must_get(&attachment_id).await?;
        if attachment.status != AttachmentStatus::Available {
            return Err(Error::precondition(
                "attachment",
                &attachment_id,
                format!(
                    "bridge for {} volume {} failed: {}",
                    side.label(),
                    side.volume.base.id,
                    attachment.error_reason.unwrap_or_default()
                ),
            ));
        }
        info!(
            "Bridged {} volume {} to dock {} via attachment {}",
            side.label(),
            side.volume.base.id,
            side.dock.name,
            attachment_id
        );

        let mut data = DriverData::new();
        replication_data::set_attachment_id(&mut data, &attachment_id);
        Ok(data)
    }

    async fn detach(&self, ctx: &Context, side: &Side, driver_data: &DriverData) -> Result<()> {
        let Some(attachment_id) = replication_data::attachment_id(driver_data) else {
            debug!("No bridge recorded for {} volume {}", side.label(), side.volume.base.id);
            return Ok(());
        };
        self.engine
            .delete_attachment(ctx, attachment_id)
            .await?
            .join()
            .await?;

        if let Some(left) = self.engine.store().attachments().get(attachment_id).await? {
            return Err(Error::precondition(
                "attachment",
                attachment_id,
                format!(
                    "bridge teardown failed: {}",
                    left.error_reason.unwrap_or_default()
                ),
            ));
        }
        info!(
            "Removed bridge {} of {} volume {}",
            attachment_id,
            side.label(),
            side.volume.base.id
        );
        Ok(())
    }

    async fn volume_data_list(
        &self,
        ctx: &Context,
        sides: [&Side; 2],
    ) -> Result<Vec<VolumeDataEntry>> {
        let scope = ListFilter::new().tenant(Some(ctx.tenant_id.clone()));
        let mut entries: Vec<VolumeDataEntry> = self
            .engine
            .store()
            .volumes()
            .list(&scope)
            .await?
            .iter()
            .filter(|v| replication_data::replication_id(&v.replication_driver_data).is_some())
            .map(data_entry)
            .collect();
        for side in sides {
            if !entries.iter().any(|e| e.volume_id == side.volume.base.id) {
                entries.push(data_entry(&side.volume));
            }
        }
        Ok(entries)
    }
}
