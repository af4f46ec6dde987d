//! Per-kind view over the documents table.

use super::Database;
use crate::error::{StoreError, StoreResult};
use crate::store::EntityStore;
use crate::types::{Entity, EntityKind};
use async_trait::async_trait;

/// Entity store for one kind, backed by the shared SQLite database.
pub struct DocumentStore {
    db: Database,
    kind: EntityKind,
}

impl DocumentStore {
    pub fn new(db: Database, kind: EntityKind) -> Self {
        Self { db, kind }
    }

    fn check_kind(&self, entity: &Entity) -> StoreResult<()> {
        if entity.kind() != self.kind {
            return Err(StoreError::WrongKind {
                expected: self.kind,
                actual: entity.kind(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for DocumentStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn snapshot(&self) -> StoreResult<Vec<Entity>> {
        self.db.list_entities(self.kind)
    }

    async fn add(&self, entity: Entity) -> StoreResult<String> {
        self.check_kind(&entity)?;
        self.db.insert_entity(&entity)?;
        Ok(entity.id().to_string())
    }

    async fn replace(&self, entity: Entity) -> StoreResult<()> {
        self.check_kind(&entity)?;
        self.db.replace_entity(&entity)
    }
}
