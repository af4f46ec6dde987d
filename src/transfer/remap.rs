//! Identifier mapping and generation for imports.

use crate::error::{ErrorCode, ImportError};
use crate::types::EntityKind;
use serde::Serialize;
use std::collections::BTreeMap;

/// Bidirectional map between incoming identifiers and written identifiers.
///
/// Only identifiers that changed are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdMapping {
    #[serde(flatten)]
    forward: BTreeMap<String, String>,
    #[serde(skip)]
    reverse: BTreeMap<String, String>,
}

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `original` was written as `written`. Identity pairs are ignored.
    pub fn insert(&mut self, original: impl Into<String>, written: impl Into<String>) {
        let original = original.into();
        let written = written.into();
        if original == written {
            return;
        }
        if let Some(previous) = self.forward.insert(original.clone(), written.clone()) {
            self.reverse.remove(&previous);
        }
        self.reverse.insert(written, original);
    }

    pub fn written_id(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    pub fn original_id(&self, written: &str) -> Option<&str> {
        self.reverse.get(written).map(String::as_str)
    }

    /// The identifier `original` ends up under (itself when unmapped).
    pub fn resolve<'a>(&'a self, original: &'a str) -> &'a str {
        self.written_id(original).unwrap_or(original)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// `(original, written)` pairs ordered by original identifier.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Source of fresh identifiers for `create-new` resolutions and
/// `preserve_ids = false` imports.
pub trait IdGenerator: Send {
    fn generate(&mut self, kind: EntityKind) -> String;
}

/// Human-readable petname identifiers (`brave-orange-otter`).
#[derive(Debug, Clone)]
pub struct PetnameIdGenerator {
    words: u8,
    separator: String,
}

impl PetnameIdGenerator {
    pub fn new(words: u8, separator: impl Into<String>) -> Self {
        Self {
            words: words.max(1),
            separator: separator.into(),
        }
    }
}

impl Default for PetnameIdGenerator {
    fn default() -> Self {
        Self::new(3, "-")
    }
}

impl IdGenerator for PetnameIdGenerator {
    fn generate(&mut self, kind: EntityKind) -> String {
        use petname::{Generator, Petnames};

        Petnames::medium()
            .generate_one(self.words, &self.separator)
            .unwrap_or_else(|| format!("{}-{}", kind, chrono::Utc::now().timestamp_millis()))
    }
}

/// Deterministic `<prefix><kind>-<n>` identifiers, for tests and reproducible runs.
#[derive(Debug, Clone)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: u64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new("new-")
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate(&mut self, kind: EntityKind) -> String {
        let id = format!("{}{}-{}", self.prefix, kind, self.next);
        self.next += 1;
        id
    }
}

const MAX_ID_ATTEMPTS: usize = 100;

/// Generate an identifier that `taken` rejects, retrying on collision.
pub fn generate_unique(
    generator: &mut dyn IdGenerator,
    kind: EntityKind,
    mut taken: impl FnMut(&str) -> bool,
) -> Result<String, ImportError> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = generator.generate(kind);
        if !id.is_empty() && !taken(&id) {
            return Ok(id);
        }
    }
    Err(ImportError::new(
        ErrorCode::IdGenerationFailed,
        format!(
            "Failed to generate unique {} ID after {} attempts. \
             Consider increasing ids.words in config.",
            kind, MAX_ID_ATTEMPTS
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_mapping_ignores_identity() {
        let mut mapping = IdMapping::new();
        mapping.insert("t1", "t1");
        assert!(mapping.is_empty());

        mapping.insert("t2", "fresh-t2");
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.written_id("t2"), Some("fresh-t2"));
        assert_eq!(mapping.original_id("fresh-t2"), Some("t2"));
        assert_eq!(mapping.resolve("t1"), "t1");
        assert_eq!(mapping.resolve("t2"), "fresh-t2");
    }

    #[test]
    fn test_mapping_overwrite_drops_stale_reverse() {
        let mut mapping = IdMapping::new();
        mapping.insert("a", "b");
        mapping.insert("a", "c");
        assert_eq!(mapping.original_id("b"), None);
        assert_eq!(mapping.original_id("c"), Some("a"));
    }

    #[test]
    fn test_mapping_serializes_as_flat_object() {
        let mut mapping = IdMapping::new();
        mapping.insert("g1", "goal-1");
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json, serde_json::json!({"g1": "goal-1"}));
    }

    #[test]
    fn test_sequential_generator() {
        let mut generator = SequentialIdGenerator::new("x-");
        assert_eq!(generator.generate(EntityKind::Task), "x-task-1");
        assert_eq!(generator.generate(EntityKind::Goal), "x-goal-2");
    }

    #[test]
    fn test_petname_generator_word_count() {
        let mut generator = PetnameIdGenerator::new(2, "_");
        let id = generator.generate(EntityKind::Thought);
        assert_eq!(id.split('_').count(), 2);
    }

    #[test]
    fn test_generate_unique_skips_taken() {
        let mut generator = SequentialIdGenerator::new("");
        let taken: HashSet<&str> = ["task-1", "task-2"].into_iter().collect();
        let id = generate_unique(&mut generator, EntityKind::Task, |id| taken.contains(id)).unwrap();
        assert_eq!(id, "task-3");
    }

    #[test]
    fn test_generate_unique_gives_up() {
        struct Stuck;
        impl IdGenerator for Stuck {
            fn generate(&mut self, _kind: EntityKind) -> String {
                "same".to_string()
            }
        }
        let err = generate_unique(&mut Stuck, EntityKind::Mood, |_| true).unwrap_err();
        assert_eq!(err.code, ErrorCode::IdGenerationFailed);
    }
}
