//! Controller Facade
//!
//! One method per control-plane operation. The facade loads the target
//! record, checks the caller may act on it and routes to the lifecycle
//! engine or the replication coordinator. Profiles, pools and docks are
//! served directly from the store.

use super::context::{Accepted, Context};
use super::inventory::Inventory;
use super::lifecycle::{
    CreateAttachmentRequest, CreateGroupRequest, CreateSnapshotRequest, CreateVolumeRequest,
    LifecycleEngine, UpdateGroupRequest,
};
use super::replication::{CreateReplicationRequest, FailoverRequest, ReplicationCoordinator};
use crate::config::Config;
use crate::domain::model::{
    Attachment, BaseModel, Dock, Entity, Pool, Profile, ProfileProperties, ReplicationPair,
    Snapshot, StorageType, Volume, VolumeGroup,
};
use crate::domain::ports::{
    CollectMetricsOpts, DriverRole, ListFilter, MetadataStoreRef, MetricSample, Table,
    OP_COLLECT_METRICS,
};
use crate::drivers::DriverManager;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// New storage policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub storage_type: StorageType,
    #[serde(default)]
    pub properties: ProfileProperties,
}

/// Partial profile update; the storage type cannot change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub storage_type: Option<StorageType>,
    #[serde(default)]
    pub properties: Option<ProfileProperties>,
}

pub struct Controller {
    config: Arc<Config>,
    store: MetadataStoreRef,
    manager: Arc<DriverManager>,
    inventory: Arc<Inventory>,
    engine: Arc<LifecycleEngine>,
    replication: Arc<ReplicationCoordinator>,
    metrics: Arc<Metrics>,
}

impl Controller {
    pub fn new(config: Arc<Config>, manager: Arc<DriverManager>, metrics: Arc<Metrics>) -> Self {
        let store = manager.store().clone();
        let inventory = Arc::new(Inventory::new(store.clone(), manager.clone()));
        let engine = Arc::new(LifecycleEngine::new(
            store.clone(),
            manager.clone(),
            inventory.clone(),
            metrics.clone(),
            config.driver_timeout(),
        ));
        let replication = Arc::new(ReplicationCoordinator::new(engine.clone()));
        Self {
            config,
            store,
            manager,
            inventory,
            engine,
            replication,
            metrics,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn engine(&self) -> &Arc<LifecycleEngine> {
        &self.engine
    }

    pub fn replication(&self) -> &Arc<ReplicationCoordinator> {
        &self.replication
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    pub fn manager(&self) -> &Arc<DriverManager> {
        &self.manager
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn create_volume(
        &self,
        ctx: &Context,
        request: CreateVolumeRequest,
    ) -> Result<Accepted<Volume>> {
        self.engine.create_volume(ctx, request).await
    }

    pub async fn get_volume(&self, ctx: &Context, id: &str) -> Result<Volume> {
        owned(ctx, self.store.volumes(), id).await
    }

    pub async fn list_volumes(&self, ctx: &Context, filter: ListFilter) -> Result<Vec<Volume>> {
        self.store.volumes().list(&scoped(ctx, filter)).await
    }

    pub async fn extend_volume(
        &self,
        ctx: &Context,
        id: &str,
        new_size: u64,
    ) -> Result<Accepted<Volume>> {
        owned(ctx, self.store.volumes(), id).await?;
        self.engine.extend_volume(ctx, id, new_size).await
    }

    pub async fn delete_volume(&self, ctx: &Context, id: &str) -> Result<Accepted<Option<Volume>>> {
        owned_if_present(ctx, self.store.volumes(), id).await?;
        self.engine.delete_volume(ctx, id).await
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    pub async fn create_attachment(
        &self,
        ctx: &Context,
        request: CreateAttachmentRequest,
    ) -> Result<Accepted<Attachment>> {
        owned(ctx, self.store.volumes(), &request.volume_id).await?;
        self.engine.create_attachment(ctx, request).await
    }

    pub async fn get_attachment(&self, ctx: &Context, id: &str) -> Result<Attachment> {
        owned(ctx, self.store.attachments(), id).await
    }

    pub async fn list_attachments(
        &self,
        ctx: &Context,
        filter: ListFilter,
    ) -> Result<Vec<Attachment>> {
        self.store.attachments().list(&scoped(ctx, filter)).await
    }

    pub async fn delete_attachment(
        &self,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<Attachment>>> {
        owned_if_present(ctx, self.store.attachments(), id).await?;
        self.engine.delete_attachment(ctx, id).await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn create_snapshot(
        &self,
        ctx: &Context,
        request: CreateSnapshotRequest,
    ) -> Result<Accepted<Snapshot>> {
        self.engine.create_snapshot(ctx, request).await
    }

    pub async fn get_snapshot(&self, ctx: &Context, id: &str) -> Result<Snapshot> {
        owned(ctx, self.store.snapshots(), id).await
    }

    pub async fn list_snapshots(&self, ctx: &Context, filter: ListFilter) -> Result<Vec<Snapshot>> {
        self.store.snapshots().list(&scoped(ctx, filter)).await
    }

    pub async fn delete_snapshot(
        &self,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<Snapshot>>> {
        owned_if_present(ctx, self.store.snapshots(), id).await?;
        self.engine.delete_snapshot(ctx, id).await
    }

    // =========================================================================
    // Volume Groups
    // =========================================================================

    pub async fn create_group(
        &self,
        ctx: &Context,
        request: CreateGroupRequest,
    ) -> Result<Accepted<VolumeGroup>> {
        self.engine.create_group(ctx, request).await
    }

    pub async fn get_group(&self, ctx: &Context, id: &str) -> Result<VolumeGroup> {
        owned(ctx, self.store.groups(), id).await
    }

    pub async fn list_groups(&self, ctx: &Context, filter: ListFilter) -> Result<Vec<VolumeGroup>> {
        self.store.groups().list(&scoped(ctx, filter)).await
    }

    pub async fn update_group(
        &self,
        ctx: &Context,
        id: &str,
        request: UpdateGroupRequest,
    ) -> Result<Accepted<VolumeGroup>> {
        owned(ctx, self.store.groups(), id).await?;
        self.engine.update_group(ctx, id, request).await
    }

    pub async fn delete_group(
        &self,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<VolumeGroup>>> {
        owned_if_present(ctx, self.store.groups(), id).await?;
        self.engine.delete_group(ctx, id).await
    }

    // =========================================================================
    // Replication
    // =========================================================================

    pub async fn create_replication(
        &self,
        ctx: &Context,
        request: CreateReplicationRequest,
    ) -> Result<Accepted<ReplicationPair>> {
        self.replication.create_replication(ctx, request).await
    }

    pub async fn get_replication(&self, ctx: &Context, id: &str) -> Result<ReplicationPair> {
        owned(ctx, self.store.replications(), id).await
    }

    pub async fn list_replications(
        &self,
        ctx: &Context,
        filter: ListFilter,
    ) -> Result<Vec<ReplicationPair>> {
        self.store.replications().list(&scoped(ctx, filter)).await
    }

    pub async fn delete_replication(
        &self,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<Option<ReplicationPair>>> {
        owned_if_present(ctx, self.store.replications(), id).await?;
        self.replication.delete_replication(ctx, id).await
    }

    pub async fn enable_replication(
        &self,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<ReplicationPair>> {
        owned(ctx, self.store.replications(), id).await?;
        self.replication.enable_replication(ctx, id).await
    }

    pub async fn disable_replication(
        &self,
        ctx: &Context,
        id: &str,
    ) -> Result<Accepted<ReplicationPair>> {
        owned(ctx, self.store.replications(), id).await?;
        self.replication.disable_replication(ctx, id).await
    }

    pub async fn failover_replication(
        &self,
        ctx: &Context,
        id: &str,
        request: FailoverRequest,
    ) -> Result<Accepted<ReplicationPair>> {
        owned(ctx, self.store.replications(), id).await?;
        self.replication.failover_replication(ctx, id, request).await
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    pub async fn create_profile(
        &self,
        ctx: &Context,
        request: CreateProfileRequest,
    ) -> Result<Profile> {
        ctx.require_admin(Profile::KIND, request.id.as_deref().unwrap_or(&request.name))?;
        if request.name.trim().is_empty() {
            return Err(Error::Validation("profile name must not be empty".into()));
        }
        if let Some(id) = request.id.as_deref() {
            if let Some(existing) = self.store.profiles().get(id).await? {
                return Ok(existing);
            }
        }
        self.ensure_profile_name_free(&request.name, None).await?;

        let profile = self
            .store
            .profiles()
            .create(Profile {
                base: BaseModel::new(request.id, &ctx.tenant_id, &ctx.user_id),
                name: request.name,
                description: request.description,
                storage_type: request.storage_type,
                properties: request.properties,
            })
            .await?;
        info!(
            "Profile {} ({}) created for {} storage",
            profile.name, profile.base.id, profile.storage_type
        );
        Ok(profile)
    }

    /// Profiles are shared by every tenant
    pub async fn get_profile(&self, _ctx: &Context, id: &str) -> Result<Profile> {
        self.store.profiles().must_get(id).await
    }

    pub async fn list_profiles(&self, _ctx: &Context, filter: ListFilter) -> Result<Vec<Profile>> {
        self.store.profiles().list(&filter.tenant(None)).await
    }

    pub async fn update_profile(
        &self,
        ctx: &Context,
        id: &str,
        request: UpdateProfileRequest,
    ) -> Result<Profile> {
        ctx.require_admin(Profile::KIND, id)?;
        let current = self.store.profiles().must_get(id).await?;
        if let Some(storage_type) = request.storage_type {
            if storage_type != current.storage_type {
                return Err(Error::Validation(format!(
                    "profile {} storage type is {} and cannot change",
                    id, current.storage_type
                )));
            }
        }
        if let Some(name) = request.name.as_deref() {
            if name.trim().is_empty() {
                return Err(Error::Validation("profile name must not be empty".into()));
            }
            self.ensure_profile_name_free(name, Some(id)).await?;
        }

        let profile = self
            .store
            .profiles()
            .update(
                id,
                Box::new(move |p: &mut Profile| {
                    if let Some(name) = request.name {
                        p.name = name;
                    }
                    if let Some(description) = request.description {
                        p.description = description;
                    }
                    if let Some(properties) = request.properties {
                        p.properties = properties;
                    }
                    Ok(())
                }),
            )
            .await?;
        info!("Profile {} updated", id);
        Ok(profile)
    }

    /// Refused while a volume or group still refers to the profile
    pub async fn delete_profile(&self, ctx: &Context, id: &str) -> Result<Option<Profile>> {
        ctx.require_admin(Profile::KIND, id)?;
        if self.store.profiles().get(id).await?.is_none() {
            return Ok(None);
        }

        let volumes = self
            .store
            .volumes()
            .list(&ListFilter::new().field("profileId", id))
            .await?;
        if let Some(volume) = volumes.first() {
            return Err(Error::precondition(
                Profile::KIND,
                id,
                format!("still used by volume {}", volume.base.id),
            ));
        }
        let groups = self.store.groups().list(&ListFilter::new()).await?;
        if let Some(group) = groups.iter().find(|g| g.profile_ids.iter().any(|p| p == id)) {
            return Err(Error::precondition(
                Profile::KIND,
                id,
                format!("still used by group {}", group.base.id),
            ));
        }

        let removed = self.store.profiles().delete(id).await?;
        info!("Profile {} deleted", id);
        Ok(removed)
    }

    async fn ensure_profile_name_free(&self, name: &str, except: Option<&str>) -> Result<()> {
        let taken = self
            .store
            .profiles()
            .list(&ListFilter::new().field("name", name))
            .await?
            .into_iter()
            .any(|p| Some(p.base.id.as_str()) != except);
        if taken {
            return Err(Error::ResourceExists {
                kind: Profile::KIND.to_string(),
                id: name.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    pub async fn get_pool(&self, _ctx: &Context, id: &str) -> Result<Pool> {
        self.inventory.pool(id).await
    }

    pub async fn list_pools(&self, _ctx: &Context, filter: ListFilter) -> Result<Vec<Pool>> {
        self.inventory.pools(&filter.tenant(None)).await
    }

    pub async fn get_dock(&self, _ctx: &Context, id: &str) -> Result<Dock> {
        self.inventory.dock(id).await
    }

    pub async fn list_docks(&self, _ctx: &Context, filter: ListFilter) -> Result<Vec<Dock>> {
        self.inventory.docks(&filter.tenant(None)).await
    }

    /// Pass-through to the backend's metrics driver
    pub async fn collect_metrics(
        &self,
        ctx: &Context,
        backend: &str,
        instance_id: &str,
        metric_names: Vec<String>,
    ) -> Result<Vec<MetricSample>> {
        self.engine.ensure_ready(backend, DriverRole::Metrics)?;
        let opts = CollectMetricsOpts {
            instance_id: instance_id.to_string(),
            metric_names,
        };
        let manager = self.manager.clone();
        self.engine
            .invoke(ctx, backend, OP_COLLECT_METRICS, async {
                let driver = manager.metrics_driver(backend).await?;
                driver.collect_metrics(&opts).await
            })
            .await
    }
}

/// Load a record the caller must own
async fn owned<T: Entity>(ctx: &Context, table: &dyn Table<T>, id: &str) -> Result<T> {
    let record = table.must_get(id).await?;
    ctx.authorize(&record)?;
    Ok(record)
}

/// As [`owned`], but an absent record is not an error
async fn owned_if_present<T: Entity>(ctx: &Context, table: &dyn Table<T>, id: &str) -> Result<()> {
    match table.get(id).await? {
        Some(record) => ctx.authorize(&record),
        None => Ok(()),
    }
}

/// Non-admin callers only ever see their own tenant
fn scoped(ctx: &Context, filter: ListFilter) -> ListFilter {
    match ctx.list_scope() {
        Some(tenant) => filter.tenant(Some(tenant)),
        None => filter,
    }
}
