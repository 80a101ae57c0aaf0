//! Resource Lifecycle Engine
//!
//! State machines for volumes, attachments, snapshots and volume groups.
//! Every operation follows the same shape:
//!
//! 1. validate preconditions and persist the intent (`*ing` status) through a
//!    status compare-and-swap
//! 2. return the persisted record to the caller as [`Accepted`]
//! 3. drive the intent through the backend driver in a background task and
//!    settle the record in a terminal status, recording the error reason on
//!    failure
//!
//! [`Accepted`]: super::context::Accepted

mod attachment;
mod group;
mod snapshot;
mod volume;

pub use attachment::CreateAttachmentRequest;
pub use group::{CreateGroupRequest, UpdateGroupRequest};
pub use snapshot::CreateSnapshotRequest;
pub use volume::CreateVolumeRequest;

use super::context::Context;
use super::inventory::Inventory;
use super::scheduler::Scheduler;
use crate::domain::model::{Pool, Profile, Volume};
use crate::domain::ports::{DriverRole, ListFilter, MetadataStoreRef};
use crate::drivers::DriverManager;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info_span, warn, Instrument};

/// Profile used when a request names none
pub const DEFAULT_PROFILE_NAME: &str = "default";

pub struct LifecycleEngine {
    store: MetadataStoreRef,
    manager: Arc<DriverManager>,
    inventory: Arc<Inventory>,
    scheduler: Scheduler,
    metrics: Arc<Metrics>,
    driver_timeout: Duration,
}

impl LifecycleEngine {
    pub fn new(
        store: MetadataStoreRef,
        manager: Arc<DriverManager>,
        inventory: Arc<Inventory>,
        metrics: Arc<Metrics>,
        driver_timeout: Duration,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(store.clone()),
            store,
            manager,
            inventory,
            metrics,
            driver_timeout,
        }
    }

    pub fn store(&self) -> &MetadataStoreRef {
        &self.store
    }

    pub fn manager(&self) -> &Arc<DriverManager> {
        &self.manager
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Fail fast when a backend's driver has not finished setup
    pub(crate) fn ensure_ready(&self, backend: &str, role: DriverRole) -> Result<()> {
        let handle = self.manager.handle(backend)?;
        if handle.role_ready(role) {
            Ok(())
        } else {
            Err(Error::InitializationPending {
                backend: backend.to_string(),
                role: role.to_string(),
            })
        }
    }

    /// Pool a volume lives on
    pub(crate) async fn pool_of(&self, volume: &Volume) -> Result<Pool> {
        self.inventory.pool(&volume.pool_id).await
    }

    pub(crate) async fn resolve_profile(&self, id: Option<&str>) -> Result<Profile> {
        match id.filter(|id| !id.is_empty()) {
            Some(id) => self
                .store
                .profiles()
                .get(id)
                .await?
                .ok_or_else(|| Error::Validation(format!("profile {} does not exist", id))),
            None => {
                let filter = ListFilter::new().field("name", DEFAULT_PROFILE_NAME);
                self.store
                    .profiles()
                    .list(&filter)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        Error::Validation("no profile given and no default profile exists".into())
                    })
            }
        }
    }

    /// Run one driver call under the request's cancellation and the
    /// per-call timeout
    pub(crate) async fn invoke<T, F>(
        &self,
        ctx: &Context,
        backend: &str,
        operation: &'static str,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(Error::DriverCancelled {
                driver: backend.to_string(),
                operation: operation.to_string(),
            }),
            outcome = tokio::time::timeout(self.driver_timeout, call) => {
                outcome.unwrap_or_else(|_| Err(Error::DriverTimeout {
                    driver: backend.to_string(),
                    operation: operation.to_string(),
                    timeout: self.driver_timeout,
                }))
            }
        };

        self.metrics
            .driver_call(backend, operation, started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            warn!("Driver call {} on {} failed: {}", operation, backend, e);
        }
        result
    }

    /// Spawn the background half of an operation
    pub(crate) fn spawn<F>(&self, ctx: &Context, operation: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("lifecycle", op = operation, request_id = %ctx.request_id);
        tokio::spawn(work.instrument(span))
    }
}

/// Log a failed settle; the record keeps its in-flight status
pub(crate) fn log_settle_failure(kind: &str, id: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("Could not settle {} {}: {}", kind, id, e);
    }
}
