//! Metadata Store Implementations
//!
//! Typed persistence for the control plane's records. Two backends share one
//! [`Table`] contract:
//! - memory: `DashMap`-backed, process lifetime only
//! - file: one JSON document per record, indexed by UUID

mod file;
mod memory;

pub use file::{FileStore, FileTable};
pub use memory::{MemoryStore, MemoryTable};

use crate::config::DatabaseConfig;
use crate::domain::model::{Entity, LifecycleStatus, Stateful};
use crate::domain::ports::{ListFilter, MetadataStoreRef, Mutation, SortDir, Table};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::info;

/// Open the store selected by `db.driver`
pub async fn open_store(config: &DatabaseConfig) -> Result<MetadataStoreRef> {
    match config.driver.as_str() {
        "memory" => {
            info!("Using in-memory metadata store");
            Ok(Arc::new(MemoryStore::new()))
        }
        "file" => {
            info!("Using file metadata store at {}", config.endpoint);
            Ok(Arc::new(FileStore::open(&config.endpoint).await?))
        }
        other => Err(Error::Configuration(format!(
            "unknown db.driver '{}', expected 'memory' or 'file'",
            other
        ))),
    }
}

// =============================================================================
// Status Transitions (compare-and-swap)
// =============================================================================

/// Status transitions on top of [`Table::update`].
///
/// Every transition checks the stored status against `from` and the entity's
/// state machine inside the same atomic update, so a lost race surfaces as
/// [`Error::StatusConflict`] instead of an overwrite.
#[async_trait]
pub trait TableExt<T: Stateful> {
    async fn transition_with(
        &self,
        id: &str,
        from: &[T::Status],
        to: T::Status,
        extra: Mutation<T>,
    ) -> Result<T>;

    async fn transition(&self, id: &str, from: &[T::Status], to: T::Status) -> Result<T> {
        self.transition_with(id, from, to, Box::new(|_| Ok(()))).await
    }

    /// Move into an error status and record why
    async fn fail(&self, id: &str, from: &[T::Status], to: T::Status, reason: String) -> Result<T> {
        self.transition_with(
            id,
            from,
            to,
            Box::new(move |record: &mut T| {
                record.set_error_reason(Some(reason));
                Ok(())
            }),
        )
        .await
    }
}

#[async_trait]
impl<T, S> TableExt<T> for S
where
    T: Stateful,
    S: Table<T> + ?Sized,
{
    async fn transition_with(
        &self,
        id: &str,
        from: &[T::Status],
        to: T::Status,
        extra: Mutation<T>,
    ) -> Result<T> {
        let from = from.to_vec();
        let record_id = id.to_string();
        self.update(
            id,
            Box::new(move |record: &mut T| {
                let current = record.status();
                if !from.contains(&current) {
                    return Err(Error::StatusConflict {
                        kind: T::KIND.to_string(),
                        id: record_id,
                        expected: join_statuses(&from),
                        actual: current.to_string(),
                    });
                }
                if current != to && !current.can_transition_to(to) {
                    return Err(Error::Internal(format!(
                        "illegal {} transition {} -> {} on {}",
                        T::KIND,
                        current,
                        to,
                        record_id
                    )));
                }
                record.set_status(to);
                record.set_error_reason(None);
                extra(record)
            }),
        )
        .await
    }
}

fn join_statuses<S: LifecycleStatus>(statuses: &[S]) -> String {
    statuses
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// List Filtering
// =============================================================================

/// Apply tenant scope, field matches, sort and paging to `records`
pub(crate) fn apply_filter<T: Entity>(records: Vec<T>, filter: &ListFilter) -> Result<Vec<T>> {
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        if let Some(tenant) = &filter.tenant_id {
            if record.tenant_id() != tenant {
                continue;
            }
        }
        let value = serde_json::to_value(&record)?;
        if filter
            .fields
            .iter()
            .all(|(key, expected)| field_matches(&value, key, expected))
        {
            rows.push((value, record));
        }
    }

    let sort_key = filter.sort_key.as_deref().unwrap_or("createdAt");
    rows.sort_by(|(a, ra), (b, rb)| {
        compare_values(a.get(sort_key), b.get(sort_key)).then_with(|| ra.id().cmp(rb.id()))
    });
    if filter.sort_dir == SortDir::Desc {
        rows.reverse();
    }

    Ok(rows
        .into_iter()
        .map(|(_, record)| record)
        .skip(filter.offset)
        .take(filter.limit.unwrap_or(usize::MAX))
        .collect())
}

fn field_matches(value: &Value, key: &str, expected: &str) -> bool {
    match value.get(key) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => expected.is_empty(),
        Some(other) => other.to_string() == expected,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
