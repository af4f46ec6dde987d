//! Store collaborator interface.
//!
//! The engine never touches persistence directly. Each entity kind has one
//! store that is the sole writer for that kind; the engine reads its current
//! contents for conflict detection and backups and writes through `add` and
//! `replace`, one call per entity.

use crate::error::{StoreError, StoreResult};
use crate::types::{Entity, EntityCollection, EntityKind};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// The per-kind store interface.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Kind of entity this store holds.
    fn kind(&self) -> EntityKind;

    /// Current contents of the store.
    async fn snapshot(&self) -> StoreResult<Vec<Entity>>;

    /// Insert a new entity. Returns the identifier it was stored under.
    async fn add(&self, entity: Entity) -> StoreResult<String>;

    /// Overwrite an existing entity with the same identifier.
    async fn replace(&self, entity: Entity) -> StoreResult<()>;
}

/// One store per entity kind.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: BTreeMap<EntityKind, Arc<dyn EntityStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its own kind, replacing any previous one.
    pub fn register(&mut self, store: Arc<dyn EntityStore>) {
        self.stores.insert(store.kind(), store);
    }

    pub fn with_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.register(store);
        self
    }

    /// A registry backed by fresh in-memory stores for every kind.
    pub fn in_memory() -> Self {
        let mut registry = Self::new();
        for kind in EntityKind::ALL {
            registry.register(Arc::new(MemoryStore::new(kind)));
        }
        registry
    }

    pub fn get(&self, kind: EntityKind) -> Option<&Arc<dyn EntityStore>> {
        self.stores.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.stores.keys().copied()
    }

    /// Dump every registered store into one collection.
    pub async fn collection(&self) -> StoreResult<EntityCollection> {
        let mut collection = EntityCollection::new();
        for store in self.stores.values() {
            for entity in store.snapshot().await? {
                collection.push(entity);
            }
        }
        Ok(collection)
    }
}

/// In-memory store keyed by identifier.
///
/// Used by tests and dry runs. `fail_with` lets tests inject store failures.
pub struct MemoryStore {
    kind: EntityKind,
    records: Mutex<BTreeMap<String, Entity>>,
    failures: Mutex<HashMap<String, FailureMode>>,
}

/// Injected failure for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Reject,
    Unauthorized,
}

impl MemoryStore {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            records: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Make writes of `id` fail.
    pub fn fail_with(&self, id: impl Into<String>, mode: FailureMode) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(id.into(), mode);
        }
    }

    /// Seed a record directly, bypassing kind checks and failure injection.
    pub fn seed(&self, entity: Entity) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(entity.id().to_string(), entity);
        }
    }

    pub fn get(&self, id: &str) -> Option<Entity> {
        self.records.lock().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, entity: &Entity) -> StoreResult<()> {
        if entity.kind() != self.kind {
            return Err(StoreError::WrongKind {
                expected: self.kind,
                actual: entity.kind(),
            });
        }
        let failures = self
            .failures
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        match failures.get(entity.id()) {
            Some(FailureMode::Reject) => Err(StoreError::Rejected(format!(
                "{} {} refused by store",
                self.kind,
                entity.id()
            ))),
            Some(FailureMode::Unauthorized) => {
                Err(StoreError::Unauthorized("session expired".to_string()))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn snapshot(&self) -> StoreResult<Vec<Entity>> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(records.values().cloned().collect())
    }

    async fn add(&self, entity: Entity) -> StoreResult<String> {
        self.check(&entity)?;
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let id = entity.id().to_string();
        if records.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                kind: self.kind,
                id,
            });
        }
        records.insert(id.clone(), entity);
        Ok(id)
    }

    async fn replace(&self, entity: Entity) -> StoreResult<()> {
        self.check(&entity)?;
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let id = entity.id().to_string();
        if !records.contains_key(&id) {
            return Err(StoreError::NotFound {
                kind: self.kind,
                id,
            });
        }
        records.insert(id, entity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Thought;
    use chrono::Utc;

    fn thought(id: &str) -> Entity {
        Entity::Thought(Thought {
            id: id.to_string(),
            content: "remember the milk".to_string(),
            tags: vec![],
            task_ids: vec![],
            project_ids: vec![],
            goal_ids: vec![],
            created_at: Utc::now(),
            updated_at: None,
            version: None,
        })
    }

    #[tokio::test]
    async fn test_memory_store_add_and_replace() {
        let store = MemoryStore::new(EntityKind::Thought);
        let id = store.add(thought("th1")).await.unwrap();
        assert_eq!(id, "th1");

        let err = store.add(thought("th1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        store.replace(thought("th1")).await.unwrap();
        let err = store.replace(thought("th2")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_wrong_kind() {
        let store = MemoryStore::new(EntityKind::Task);
        let err = store.add(thought("th1")).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongKind { .. }));
    }

    #[tokio::test]
    async fn test_memory_store_injected_failures() {
        let store = MemoryStore::new(EntityKind::Thought);
        store.fail_with("bad", FailureMode::Reject);
        store.fail_with("gone", FailureMode::Unauthorized);

        assert!(!store.add(thought("bad")).await.unwrap_err().is_fatal());
        assert!(store.add(thought("gone")).await.unwrap_err().is_fatal());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_registry_collection() {
        let registry = StoreRegistry::in_memory();
        registry
            .get(EntityKind::Thought)
            .unwrap()
            .add(thought("th1"))
            .await
            .unwrap();
        let collection = registry.collection().await.unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.thoughts[0].id, "th1");
        assert_eq!(registry.kinds().count(), 7);
    }
}
