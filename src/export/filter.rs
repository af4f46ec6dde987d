//! Export filtering.
//!
//! Every option is a per-record predicate; no record is dropped because of
//! what another record references.

use super::ExportedBundle;
use crate::error::StoreResult;
use crate::store::StoreRegistry;
use crate::types::{Entity, EntityCollection, EntityKind};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::info;

/// Inclusive creation-time window. Either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at <= end)
    }
}

/// What to include in an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFilterOptions {
    pub kinds: BTreeSet<EntityKind>,
    pub date_range: Option<DateRange>,
    /// Status allow-list. Kinds without a status are unaffected.
    pub statuses: Option<BTreeSet<String>>,
    pub include_completed: bool,
}

impl Default for ExportFilterOptions {
    fn default() -> Self {
        Self {
            kinds: EntityKind::ALL.into_iter().collect(),
            date_range: None,
            statuses: None,
            include_completed: true,
        }
    }
}

impl ExportFilterOptions {
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_statuses<S: Into<String>>(mut self, statuses: impl IntoIterator<Item = S>) -> Self {
        self.statuses = Some(statuses.into_iter().map(Into::into).collect());
        self
    }

    pub fn without_completed(mut self) -> Self {
        self.include_completed = false;
        self
    }

    /// Whether a single record passes the filter.
    pub fn matches(&self, entity: &Entity) -> bool {
        if !self.kinds.contains(&entity.kind()) {
            return false;
        }
        if let Some(range) = &self.date_range
            && !range.contains(entity.created_at())
        {
            return false;
        }
        if let (Some(allowed), Some(status)) = (&self.statuses, entity.status())
            && !allowed.contains(status)
        {
            return false;
        }
        if !self.include_completed && entity.is_completed() {
            return false;
        }
        true
    }

    pub fn apply(&self, collection: &EntityCollection) -> EntityCollection {
        let mut filtered = collection.clone();
        filtered.retain(|entity| self.matches(entity));
        filtered
    }
}

/// Filter a notebook and wrap the result in a bundle.
pub fn export_bundle(
    collection: &EntityCollection,
    options: &ExportFilterOptions,
    user_id: &str,
) -> ExportedBundle {
    let filtered = options.apply(collection);
    info!(
        total = collection.len(),
        exported = filtered.len(),
        "Filtered notebook for export"
    );
    ExportedBundle::new(user_id, filtered)
}

/// Read every registered store and export it.
pub async fn export_from_stores(
    stores: &StoreRegistry,
    options: &ExportFilterOptions,
    user_id: &str,
) -> StoreResult<ExportedBundle> {
    let collection = stores.collection().await?;
    Ok(export_bundle(&collection, options, user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Goal, GoalStatus, Person, Project, ProjectStatus, Task, TaskPriority, TaskStatus};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap()
    }

    fn task(id: &str, status: TaskStatus, day: u32) -> Entity {
        Entity::Task(Task {
            id: id.into(),
            title: id.into(),
            notes: None,
            status,
            priority: TaskPriority::Medium,
            due_date: None,
            completed_at: None,
            project_id: Some("p1".into()),
            goal_id: None,
            parent_task_id: None,
            thought_ids: vec![],
            created_at: at(day),
            updated_at: None,
            version: None,
        })
    }

    fn notebook() -> EntityCollection {
        EntityCollection::from_entities(vec![
            task("t-todo", TaskStatus::Todo, 1),
            task("t-done", TaskStatus::Done, 2),
            task("t-cancel", TaskStatus::Cancelled, 3),
            Entity::Project(Project {
                id: "p1".into(),
                title: "Garden".into(),
                description: None,
                status: ProjectStatus::Archived,
                goal_id: None,
                parent_project_id: None,
                related_project_ids: vec![],
                thought_ids: vec![],
                created_at: at(1),
                updated_at: None,
                version: None,
            }),
            Entity::Goal(Goal {
                id: "g1".into(),
                title: "Health".into(),
                description: None,
                status: GoalStatus::Active,
                target_date: None,
                parent_goal_id: None,
                created_at: at(10),
                updated_at: None,
                version: None,
            }),
            Entity::Person(Person {
                id: "pe1".into(),
                name: "Sam".into(),
                relationship: None,
                notes: None,
                last_contacted_at: None,
                thought_ids: vec![],
                task_ids: vec![],
                created_at: at(5),
                updated_at: None,
                version: None,
            }),
        ])
    }

    #[test]
    fn test_default_exports_everything() {
        let bundle = export_bundle(&notebook(), &ExportFilterOptions::default(), "u1");
        assert_eq!(bundle.metadata().total_items, 6);
        assert_eq!(bundle.metadata().user_id, "u1");
    }

    #[test]
    fn test_exclude_completed() {
        let options = ExportFilterOptions::default().without_completed();
        let bundle = export_bundle(&notebook(), &options, "u1");
        let data = bundle.data();
        assert_eq!(data.tasks.len(), 1);
        assert_eq!(data.tasks[0].id, "t-todo");
        // Archived project dropped; its task keeps the reference.
        assert!(data.projects.is_empty());
        assert_eq!(data.tasks[0].project_id.as_deref(), Some("p1"));
        assert_eq!(bundle.metadata().entity_counts.get("projects"), Some(&0));
        assert_eq!(bundle.metadata().total_items, 3);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let options = ExportFilterOptions::default()
            .with_kinds([EntityKind::Task])
            .with_date_range(DateRange::new(Some(at(2)), Some(at(3))));
        let filtered = options.apply(&notebook());
        let ids: Vec<&str> = filtered.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t-done", "t-cancel"]);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_open_ended_range() {
        let range = DateRange::new(Some(at(5)), None);
        assert!(range.contains(at(5)));
        assert!(range.contains(at(30)));
        assert!(!range.contains(at(4)));
    }

    #[test]
    fn test_status_allow_list_ignores_statusless_kinds() {
        let options = ExportFilterOptions::default().with_statuses(["done", "active"]);
        let filtered = options.apply(&notebook());
        assert_eq!(filtered.tasks.len(), 1);
        assert_eq!(filtered.goals.len(), 1);
        assert!(filtered.projects.is_empty());
        assert_eq!(filtered.people.len(), 1);
    }

    #[tokio::test]
    async fn test_export_from_stores() {
        let stores = StoreRegistry::in_memory();
        for entity in notebook().entities() {
            stores.get(entity.kind()).unwrap().add(entity).await.unwrap();
        }
        let options = ExportFilterOptions::default().with_kinds([EntityKind::Person]);
        let bundle = export_from_stores(&stores, &options, "u2").await.unwrap();
        assert_eq!(bundle.metadata().total_items, 1);
        assert_eq!(bundle.data().people[0].name, "Sam");
    }
}
