//! File Metadata Store
//!
//! Persists every record as a JSON document named `<id>.json` under one
//! directory per collection. Reads are served from an in-memory index that is
//! rebuilt from disk on open.

use super::memory::MemoryTable;
use super::apply_filter;
use crate::domain::model::{
    Attachment, Dock, Entity, Pool, Profile, ReplicationPair, Snapshot, Volume, VolumeGroup,
};
use crate::domain::ports::{ListFilter, MetadataStore, Mutation, Table};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

// =============================================================================
// File Table
// =============================================================================

/// One collection persisted as JSON documents
pub struct FileTable<T: Entity> {
    dir: PathBuf,
    index: MemoryTable<T>,
    /// Orders index mutation with the matching disk write
    write_lock: Mutex<()>,
}

impl<T: Entity> FileTable<T> {
    /// Open the collection directory, loading every document in it
    pub async fn open(root: &Path) -> Result<Self> {
        let dir = root.join(format!("{}s", T::KIND));
        fs::create_dir_all(&dir).await?;

        let table = Self {
            dir,
            index: MemoryTable::new(),
            write_lock: Mutex::new(()),
        };
        table.rebuild_index().await?;
        Ok(table)
    }

    async fn rebuild_index(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut loaded = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path).await?;
            match serde_json::from_str::<T>(&raw) {
                Ok(record) => {
                    self.index.put(record);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping unreadable {} document {:?}: {}", T::KIND, path, e),
            }
        }

        debug!("Loaded {} {} records from {:?}", loaded, T::KIND, self.dir);
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn persist(&self, record: &T) -> Result<()> {
        let path = self.path_for(record.id());
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: Entity> Table<T> for FileTable<T> {
    async fn create(&self, record: T) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let record = self.index.insert_new(record)?;
        if let Err(e) = self.persist(&record).await {
            self.index.remove(record.id());
            return Err(e);
        }
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        self.index.get(id).await
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<T>> {
        apply_filter(self.index.snapshot(), filter)
    }

    async fn update(&self, id: &str, mutate: Mutation<T>) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let previous = self.index.get(id).await?;
        let record = self.index.apply(id, mutate)?;
        if let Err(e) = self.persist(&record).await {
            if let Some(previous) = previous {
                self.index.put(previous);
            }
            return Err(e);
        }
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<Option<T>> {
        let _guard = self.write_lock.lock().await;
        let Some(removed) = self.index.remove(id) else {
            return Ok(None);
        };
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(Some(removed)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Some(removed)),
            Err(e) => {
                self.index.put(removed);
                Err(e.into())
            }
        }
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Metadata store rooted at a directory
pub struct FileStore {
    volumes: FileTable<Volume>,
    attachments: FileTable<Attachment>,
    snapshots: FileTable<Snapshot>,
    groups: FileTable<VolumeGroup>,
    replications: FileTable<ReplicationPair>,
    profiles: FileTable<Profile>,
    pools: FileTable<Pool>,
    docks: FileTable<Dock>,
}

impl FileStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await?;

        Ok(Self {
            volumes: FileTable::open(root).await?,
            attachments: FileTable::open(root).await?,
            snapshots: FileTable::open(root).await?,
            groups: FileTable::open(root).await?,
            replications: FileTable::open(root).await?,
            profiles: FileTable::open(root).await?,
            pools: FileTable::open(root).await?,
            docks: FileTable::open(root).await?,
        })
    }
}

impl MetadataStore for FileStore {
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
