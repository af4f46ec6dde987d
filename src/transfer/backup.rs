//! Pre-import backup snapshots.
//!
//! A snapshot is taken from every registered store before the first write
//! and handed to a [`BackupSink`]. Snapshots are write-once and are never
//! restored automatically.

use crate::error::{StoreError, StoreResult};
use crate::store::StoreRegistry;
use crate::types::EntityCollection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

pub const PRE_IMPORT_TAG: &str = "pre_import";

/// Immutable capture of the notebook at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    id: String,
    tag: String,
    created_at: DateTime<Utc>,
    total_items: usize,
    data: EntityCollection,
}

impl BackupSnapshot {
    pub fn new(tag: &str, data: EntityCollection) -> Self {
        let created_at = Utc::now();
        Self {
            id: format!("{}-{}", tag, created_at.format("%Y%m%dT%H%M%S%.3fZ")),
            tag: tag.to_string(),
            created_at,
            total_items: data.len(),
            data,
        }
    }

    /// Dump every registered store.
    pub async fn capture(stores: &StoreRegistry, tag: &str) -> StoreResult<Self> {
        Ok(Self::new(tag, stores.collection().await?))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn data(&self) -> &EntityCollection {
        &self.data
    }
}

/// Where backups go.
#[async_trait]
pub trait BackupSink: Send + Sync {
    /// Persist a snapshot. Returns its identifier.
    async fn save(&self, snapshot: &BackupSnapshot) -> StoreResult<String>;
}

/// Keeps snapshots in memory.
#[derive(Default)]
pub struct MemoryBackupSink {
    snapshots: Mutex<Vec<BackupSnapshot>>,
}

impl MemoryBackupSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<BackupSnapshot> {
        self.snapshots
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BackupSink for MemoryBackupSink {
    async fn save(&self, snapshot: &BackupSnapshot) -> StoreResult<String> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if snapshots.iter().any(|s| s.id == snapshot.id) {
            return Err(StoreError::Rejected(format!(
                "backup {} already exists",
                snapshot.id
            )));
        }
        snapshots.push(snapshot.clone());
        Ok(snapshot.id.clone())
    }
}

/// Writes each snapshot to `<dir>/<id>.json.gz`, refusing to overwrite.
#[derive(Debug, Clone)]
pub struct FileBackupSink {
    dir: PathBuf,
}

impl FileBackupSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json.gz", id))
    }

    /// Read a snapshot back.
    pub fn load(&self, id: &str) -> StoreResult<BackupSnapshot> {
        let file = fs::File::open(self.path_for(id))?;
        let decoder = GzDecoder::new(BufReader::new(file));
        Ok(serde_json::from_reader(decoder)?)
    }

    /// Identifiers of stored snapshots, oldest first.
    pub fn list(&self) -> StoreResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_suffix(".json.gz"))
                    .map(String::from)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl BackupSink for FileBackupSink {
    async fn save(&self, snapshot: &BackupSnapshot) -> StoreResult<String> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(snapshot.id());
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, snapshot)?;
        encoder.finish()?.flush()?;
        info!(
            backup = %snapshot.id(),
            items = snapshot.total_items(),
            path = %path.display(),
            "Wrote pre-import backup"
        );
        Ok(snapshot.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entity, EntityKind, Goal, GoalStatus};
    use tempfile::TempDir;

    async fn seeded_stores() -> StoreRegistry {
        let stores = StoreRegistry::in_memory();
        let goal = Entity::Goal(Goal {
            id: "g1".into(),
            title: "Learn Rust".into(),
            description: None,
            status: GoalStatus::Active,
            target_date: None,
            parent_goal_id: None,
            created_at: Utc::now(),
            updated_at: None,
            version: Some(3),
        });
        stores.get(EntityKind::Goal).unwrap().add(goal).await.unwrap();
        stores
    }

    #[tokio::test]
    async fn test_capture_dumps_every_store() {
        let stores = seeded_stores().await;
        let snapshot = BackupSnapshot::capture(&stores, PRE_IMPORT_TAG).await.unwrap();
        assert_eq!(snapshot.tag(), "pre_import");
        assert!(snapshot.id().starts_with("pre_import-"));
        assert_eq!(snapshot.total_items(), 1);
        assert_eq!(snapshot.data().goals[0].version, Some(3));
    }

    #[tokio::test]
    async fn test_memory_sink_is_write_once() {
        let sink = MemoryBackupSink::new();
        let snapshot = BackupSnapshot::new(PRE_IMPORT_TAG, EntityCollection::new());
        assert_eq!(sink.save(&snapshot).await.unwrap(), snapshot.id());
        assert!(sink.save(&snapshot).await.is_err());
        assert_eq!(sink.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_file_sink_roundtrip() {
        let dir = TempDir::new().unwrap();
        let sink = FileBackupSink::new(dir.path().join("backups"));
        let stores = seeded_stores().await;
        let snapshot = BackupSnapshot::capture(&stores, PRE_IMPORT_TAG).await.unwrap();

        let id = sink.save(&snapshot).await.unwrap();
        assert!(sink.path_for(&id).exists());
        assert_eq!(sink.list().unwrap(), vec![id.clone()]);
        assert_eq!(sink.load(&id).unwrap(), snapshot);

        // Write-once: a second save of the same snapshot fails.
        assert!(sink.save(&snapshot).await.is_err());
    }
}
