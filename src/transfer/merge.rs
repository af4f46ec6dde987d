//! Field-wise record merge for the `merge` resolution.

use crate::types::Entity;
use serde_json::Value;

/// Overlay `newer` onto `older`.
///
/// - Objects merge key by key; keys only in `older` are kept
/// - Arrays are unioned, `older` order first
/// - Null in `newer` keeps the `older` value
/// - Anything else takes the `newer` value
pub fn merge_values(older: Value, newer: Value) -> Value {
    match (older, newer) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (Value::Array(mut base), Value::Array(overlay)) => {
            for item in overlay {
                if !base.contains(&item) {
                    base.push(item);
                }
            }
            Value::Array(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Merge an incoming record with the existing one, preferring whichever has
/// the later modification time. The result keeps the existing identifier.
pub fn merge_entities(existing: &Entity, incoming: &Entity) -> serde_json::Result<Entity> {
    let (older, newer) = if incoming.modified_at() >= existing.modified_at() {
        (existing, incoming)
    } else {
        (incoming, existing)
    };
    let merged = merge_values(older.to_record_json()?, newer.to_record_json()?);
    let mut entity = Entity::from_record_json(existing.kind(), merged)?;
    entity.set_id(existing.id());
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Thought, Task, TaskPriority, TaskStatus};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_merge_values_unions_arrays() {
        let older = json!({"tags": ["a", "b"], "content": "old", "keep": 1});
        let newer = json!({"tags": ["b", "c"], "content": "new", "keep": null});
        assert_eq!(
            merge_values(older, newer),
            json!({"tags": ["a", "b", "c"], "content": "new", "keep": 1})
        );
    }

    #[test]
    fn test_merge_entities_newer_wins() {
        let existing = Entity::Task(Task {
            id: "t1".into(),
            title: "Old title".into(),
            notes: Some("keep me".into()),
            status: TaskStatus::Todo,
            priority: TaskPriority::Low,
            due_date: None,
            completed_at: None,
            project_id: None,
            goal_id: None,
            parent_task_id: None,
            thought_ids: vec!["th1".into()],
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()),
            version: Some(1),
        });
        let incoming = Entity::Task(Task {
            id: "t1".into(),
            title: "New title".into(),
            notes: None,
            status: TaskStatus::Done,
            priority: TaskPriority::High,
            due_date: None,
            completed_at: None,
            project_id: None,
            goal_id: None,
            parent_task_id: None,
            thought_ids: vec!["th2".into()],
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            version: Some(2),
        });

        let Entity::Task(merged) = merge_entities(&existing, &incoming).unwrap() else {
            panic!("kind changed");
        };
        assert_eq!(merged.title, "New title");
        assert_eq!(merged.notes.as_deref(), Some("keep me"));
        assert_eq!(merged.status, TaskStatus::Done);
        assert_eq!(merged.thought_ids, vec!["th1", "th2"]);
        assert_eq!(merged.version, Some(2));

        // Older incoming loses scalar fields but still contributes list items.
        let Entity::Task(merged) = merge_entities(&incoming, &existing).unwrap() else {
            panic!("kind changed");
        };
        assert_eq!(merged.title, "New title");
        assert_eq!(merged.thought_ids, vec!["th1", "th2"]);
    }

    #[test]
    fn test_merge_keeps_existing_id() {
        let make = |id: &str, tag: &str| {
            Entity::Thought(Thought {
                id: id.into(),
                content: "c".into(),
                tags: vec![tag.into()],
                task_ids: vec![],
                project_ids: vec![],
                goal_ids: vec![],
                created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                updated_at: None,
                version: None,
            })
        };
        let merged = merge_entities(&make("th1", "x"), &make("th1", "y")).unwrap();
        assert_eq!(merged.id(), "th1");
    }
}
