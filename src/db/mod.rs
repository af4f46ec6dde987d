//! SQLite document store for notebook records.
//!
//! Every record lives in one `documents` table as a JSON body tagged with its
//! kind. [`DocumentStore`] exposes one kind of that table through the
//! [`EntityStore`](crate::store::EntityStore) interface.

pub mod documents;

pub use documents::DocumentStore;

use crate::error::{StoreError, StoreResult};
use crate::store::StoreRegistry;
use crate::types::{Entity, EntityCollection, EntityKind};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    fn run_migrations(&self) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            embedded::migrations::runner()
                .run(conn)
                .map_err(|e| StoreError::Unavailable(format!("migration failed: {}", e)))?;
            Ok(())
        })
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("connection poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("connection poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Insert a new document. Fails with `AlreadyExists` on an id collision.
    pub fn insert_entity(&self, entity: &Entity) -> StoreResult<()> {
        let body = serde_json::to_string(&entity.to_record_json()?)?;
        let kind = entity.kind();
        let id = entity.id().to_string();
        self.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO documents (id, kind, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    kind.as_str(),
                    body,
                    entity.created_at().to_rfc3339(),
                    entity.updated_at().map(|t| t.to_rfc3339()),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(err)
                    if err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) =>
                {
                    Err(StoreError::AlreadyExists { kind, id })
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Overwrite an existing document of the same kind.
    pub fn replace_entity(&self, entity: &Entity) -> StoreResult<()> {
        let body = serde_json::to_string(&entity.to_record_json()?)?;
        let kind = entity.kind();
        let id = entity.id().to_string();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE documents SET body = ?3, created_at = ?4, updated_at = ?5
                 WHERE id = ?1 AND kind = ?2",
                params![
                    id,
                    kind.as_str(),
                    body,
                    entity.created_at().to_rfc3339(),
                    entity.updated_at().map(|t| t.to_rfc3339()),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { kind, id });
            }
            Ok(())
        })
    }

    /// Fetch one document by id.
    pub fn get_entity(&self, id: &str) -> StoreResult<Option<Entity>> {
        let row: Option<(String, String)> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT kind, body FROM documents WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;
        row.map(|(kind, body)| decode_document(&kind, &body))
            .transpose()
    }

    /// All documents of one kind, ordered by creation time then id.
    pub fn list_entities(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
        let bodies: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM documents WHERE kind = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        bodies
            .iter()
            .map(|body| decode_document(kind.as_str(), body))
            .collect()
    }

    /// Number of documents per kind.
    pub fn count_entities(&self, kind: EntityKind) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Load the whole notebook.
    pub fn collection(&self) -> StoreResult<EntityCollection> {
        let mut collection = EntityCollection::new();
        for kind in EntityKind::ALL {
            for entity in self.list_entities(kind)? {
                collection.push(entity);
            }
        }
        Ok(collection)
    }

    /// A store registry with one document store per kind over this database.
    pub fn stores(&self) -> StoreRegistry {
        let mut registry = StoreRegistry::new();
        for kind in EntityKind::ALL {
            registry.register(Arc::new(DocumentStore::new(self.clone(), kind)));
        }
        registry
    }
}

fn decode_document(kind: &str, body: &str) -> StoreResult<Entity> {
    let kind: EntityKind = kind
        .parse()
        .map_err(|e: String| StoreError::Rejected(format!("corrupt document kind: {}", e)))?;
    let value: serde_json::Value = serde_json::from_str(body)?;
    Ok(Entity::from_record_json(kind, value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Goal, GoalStatus};
    use chrono::Utc;

    fn goal(id: &str, title: &str) -> Entity {
        Entity::Goal(Goal {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            status: GoalStatus::Active,
            target_date: None,
            parent_goal_id: None,
            created_at: Utc::now(),
            updated_at: None,
            version: Some(1),
        })
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entity(&goal("g1", "Run a marathon")).unwrap();

        let loaded = db.get_entity("g1").unwrap().unwrap();
        assert_eq!(loaded.kind(), EntityKind::Goal);
        assert_eq!(loaded.label(), "Run a marathon");
        assert!(db.get_entity("missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_id_is_already_exists() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entity(&goal("g1", "a")).unwrap();
        let err = db.insert_entity(&goal("g1", "b")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_replace_requires_existing() {
        let db = Database::open_in_memory().unwrap();
        let err = db.replace_entity(&goal("g1", "a")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        db.insert_entity(&goal("g1", "a")).unwrap();
        db.replace_entity(&goal("g1", "renamed")).unwrap();
        assert_eq!(db.get_entity("g1").unwrap().unwrap().label(), "renamed");
        assert_eq!(db.count_entities(EntityKind::Goal).unwrap(), 1);
    }

    #[test]
    fn test_collection_groups_by_kind() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entity(&goal("g1", "a")).unwrap();
        db.insert_entity(&goal("g2", "b")).unwrap();
        let collection = db.collection().unwrap();
        assert_eq!(collection.goals.len(), 2);
        assert_eq!(collection.len(), 2);
    }
}
