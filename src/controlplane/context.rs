//! Request Context
//!
//! Caller identity and cancellation carried from the inbound request down to
//! every driver call, plus the [`Accepted`] handle returned by asynchronous
//! operations.

use crate::domain::model::Entity;
use crate::error::{Error, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Who is calling and how to abort their work
#[derive(Debug, Clone)]
pub struct Context {
    pub tenant_id: String,
    pub user_id: String,
    pub is_admin: bool,
    pub request_id: String,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            is_admin: false,
            request_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// Administrative context for internal work
    pub fn admin() -> Self {
        Self {
            is_admin: true,
            ..Self::new("admin", "admin")
        }
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tenant match unless admin
    pub fn authorize<T: Entity>(&self, record: &T) -> Result<()> {
        if self.is_admin || record.tenant_id() == self.tenant_id {
            Ok(())
        } else {
            Err(Error::Forbidden {
                kind: T::KIND.to_string(),
                id: record.id().to_string(),
            })
        }
    }

    pub fn require_admin(&self, kind: &str, id: &str) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(Error::Forbidden {
                kind: kind.to_string(),
                id: id.to_string(),
            })
        }
    }

    /// Tenant restriction for list calls; admins see everything
    pub fn list_scope(&self) -> Option<String> {
        (!self.is_admin).then(|| self.tenant_id.clone())
    }
}

// =============================================================================
// Accepted
// =============================================================================

/// A persisted intent whose completion runs in the background
#[derive(Debug)]
pub struct Accepted<T> {
    /// Record as persisted when the request was accepted
    pub record: T,
    task: Option<JoinHandle<()>>,
}

impl<T> Accepted<T> {
    pub(crate) fn running(record: T, task: JoinHandle<()>) -> Self {
        Self {
            record,
            task: Some(task),
        }
    }

    /// Nothing left to do in the background
    pub(crate) fn done(record: T) -> Self {
        Self { record, task: None }
    }

    pub fn is_settled(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the background work; the outcome is observable in the store
    pub async fn join(self) -> Result<T> {
        if let Some(task) = self.task {
            task.await
                .map_err(|e| Error::Internal(format!("background task failed: {}", e)))?;
        }
        Ok(self.record)
    }

    /// Split off the background task
    pub fn detach(self) -> T {
        self.record
    }
}
