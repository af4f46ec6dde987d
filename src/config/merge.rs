//! Field-by-field merging of configuration tiers.
//!
//! Objects merge recursively; arrays and scalars from the higher tier replace
//! the lower tier's value outright.

use serde_json::Value;

/// Merge `overlay` onto `base`, `overlay` winning.
///
/// A null in the overlay means "not specified" and keeps the base value.
///
/// # Example
/// ```
/// use serde_json::json;
/// use notebook_transfer::config::deep_merge;
///
/// let base = json!({
///     "store": { "db_path": "notebook/notebook.db", "backup_dir": "notebook/backups" },
///     "import": { "create_backup": true }
/// });
/// let overlay = json!({ "store": { "db_path": "/data/nb.db" } });
/// let merged = deep_merge(base, overlay);
/// assert_eq!(merged["store"]["db_path"], "/data/nb.db");
/// assert_eq!(merged["store"]["backup_dir"], "notebook/backups");
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut merged), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let value = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Fold tiers from lowest to highest priority.
pub fn deep_merge_all(tiers: impl IntoIterator<Item = Value>) -> Value {
    tiers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sections_merge_per_field() {
        let base = json!({"ids": {"words": 3, "separator": "-"}, "owner": {"user_id": "local"}});
        let overlay = json!({"ids": {"words": 4}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"ids": {"words": 4, "separator": "-"}, "owner": {"user_id": "local"}})
        );
    }

    #[test]
    fn test_arrays_replace() {
        let base = json!({"export": {"kinds": ["task", "goal"]}});
        let overlay = json!({"export": {"kinds": ["mood"]}});
        assert_eq!(deep_merge(base, overlay), json!({"export": {"kinds": ["mood"]}}));
    }

    #[test]
    fn test_null_keeps_lower_tier() {
        let base = json!({"import": {"error_threshold": 5}});
        let overlay = json!({"import": {"error_threshold": null}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"import": {"error_threshold": 5}})
        );
    }

    #[test]
    fn test_scalar_and_object_replace_each_other() {
        assert_eq!(
            deep_merge(json!({"owner": "sam"}), json!({"owner": {"user_id": "sam"}})),
            json!({"owner": {"user_id": "sam"}})
        );
        assert_eq!(
            deep_merge(json!({"owner": {"user_id": "sam"}}), json!({"owner": "sam"})),
            json!({"owner": "sam"})
        );
    }

    #[test]
    fn test_merge_all_later_wins() {
        let merged = deep_merge_all(vec![
            json!({"export": {"gzip": false, "include_completed": true}}),
            Value::Null,
            json!({"export": {"gzip": true}}),
        ]);
        assert_eq!(merged, json!({"export": {"gzip": true, "include_completed": true}}));
    }
}
