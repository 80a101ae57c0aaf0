//! In-Memory Metadata Store
//!
//! Concurrent record tables backed by DashMap. A record update holds the
//! shard write lock for the duration of the mutation, which is what makes
//! status compare-and-swap atomic.

use super::apply_filter;
use crate::domain::model::{
    Attachment, Dock, Entity, Pool, Profile, ReplicationPair, Snapshot, Volume, VolumeGroup,
};
use crate::domain::ports::{ListFilter, MetadataStore, Mutation, Table};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

// =============================================================================
// Memory Table
// =============================================================================

/// One collection of records keyed by id
pub struct MemoryTable<T: Entity> {
    records: DashMap<String, T>,
}

impl<T: Entity> MemoryTable<T> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace without the create-only check (used when loading)
    pub(crate) fn put(&self, record: T) {
        self.records.insert(record.id().to_string(), record);
    }

    pub(crate) fn insert_new(&self, record: T) -> Result<T> {
        match self.records.entry(record.id().to_string()) {
            Entry::Occupied(_) => Err(Error::ResourceExists {
                kind: T::KIND.to_string(),
                id: record.id().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    pub(crate) fn apply(&self, id: &str, mutate: Mutation<T>) -> Result<T> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| Error::not_found(T::KIND, id))?;

        let mut next = entry.value().clone();
        mutate(&mut next)?;
        next.base_mut().touch();
        *entry = next.clone();
        Ok(next)
    }

    pub(crate) fn remove(&self, id: &str) -> Option<T> {
        self.records.remove(id).map(|(_, record)| record)
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

impl<T: Entity> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Table<T> for MemoryTable<T> {
    async fn create(&self, record: T) -> Result<T> {
        self.insert_new(record)
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<T>> {
        apply_filter(self.snapshot(), filter)
    }

    async fn update(&self, id: &str, mutate: Mutation<T>) -> Result<T> {
        self.apply(id, mutate)
    }

    async fn delete(&self, id: &str) -> Result<Option<T>> {
        Ok(self.remove(id))
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Metadata store that lives for the process lifetime
#[derive(Default)]
pub struct MemoryStore {
    volumes: MemoryTable<Volume>,
    attachments: MemoryTable<Attachment>,
    snapshots: MemoryTable<Snapshot>,
    groups: MemoryTable<VolumeGroup>,
    replications: MemoryTable<ReplicationPair>,
    profiles: MemoryTable<Profile>,
    pools: MemoryTable<Pool>,
    docks: MemoryTable<Dock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryStore {
    fn volumes(&self) -> &dyn Table<Volume> {
        &self.volumes
    }

    fn attachments(&self) -> &dyn Table<Attachment> {
        &self.attachments
    }

    fn snapshots(&self) -> &dyn Table<Snapshot> {
        &self.snapshots
    }

    fn groups(&self) -> &dyn Table<VolumeGroup> {
        &self.groups
    }

    fn replications(&self) -> &dyn Table<ReplicationPair> {
        &self.replications
    }

    fn profiles(&self) -> &dyn Table<Profile> {
        &self.profiles
    }

    fn pools(&self) -> &dyn Table<Pool> {
        &self.pools
    }

    fn docks(&self) -> &dyn Table<Dock> {
        &self.docks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::snapshot;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_is_at_most_once() {
        let table = MemoryTable::new();
        table.create(snapshot("s1", "t1", "v1", 1)).await.unwrap();

        let err = table.create(snapshot("s1", "t1", "v1", 1)).await.unwrap_err();
        assert_matches!(err, Error::ResourceExists { .. });
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_writes_nothing() {
        let table = MemoryTable::new();
        table.create(snapshot("s1", "t1", "v1", 1)).await.unwrap();

        let result = table
            .update(
                "s1",
                Box::new(|s: &mut Snapshot| {
                    s.size = 99;
                    Err(Error::Validation("rejected".into()))
                }),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(table.must_get("s1").await.unwrap().size, 1);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let table: MemoryTable<Snapshot> = MemoryTable::new();
        let err = table.update("nope", Box::new(|_| Ok(()))).await.unwrap_err();
        assert_matches!(err, Error::ResourceNotFound { .. });
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let table = Arc::new(MemoryTable::new());
        table.create(snapshot("s1", "t1", "v1", 0)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                table
                    .update(
                        "s1",
                        Box::new(|s: &mut Snapshot| {
                            s.size += 1;
                            Ok(())
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(table.must_get("s1").await.unwrap().size, 32);
    }
}
