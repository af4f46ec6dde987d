//! Bundle parsing and record validation.
//!
//! Records are validated one at a time so that a single bad record blocks
//! only itself. Issues carry a severity: warnings never block; errors drop
//! the offending record, and an unsupported bundle version blocks the whole
//! import.

use crate::error::{BundleError, ErrorCode, ImportError};
use crate::export::{BundleMetadata, SUPPORTED_MAJOR_VERSION, is_supported_version};
use crate::types::{Entity, EntityCollection, EntityKind};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    /// Position of the record in its bundle section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    fn new(severity: Severity, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            kind: None,
            index: None,
            entity_id: None,
            field: None,
            message: message.into(),
        }
    }

    fn at(mut self, kind: EntityKind, index: usize, entity_id: Option<&str>) -> Self {
        self.kind = Some(kind);
        self.index = Some(index);
        self.entity_id = entity_id.map(String::from);
        self
    }

    fn field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn to_import_error(&self) -> ImportError {
        let mut err = ImportError::new(self.code, self.message.clone());
        err.kind = self.kind;
        err.entity_id = self.entity_id.clone();
        err
    }
}

/// A bundle split into its envelope and untyped record sections.
#[derive(Debug, Clone, Default)]
pub struct BundleParts {
    pub metadata: Option<Value>,
    pub sections: BTreeMap<EntityKind, Vec<Value>>,
    /// Structural problems found while splitting.
    pub issues: Vec<ValidationIssue>,
}

impl BundleParts {
    /// Split a bundle value. Fails only when there is no `data` object.
    pub fn parse(bundle: &Value) -> Result<Self, BundleError> {
        let data = bundle
            .get("data")
            .and_then(Value::as_object)
            .ok_or(BundleError::MissingSection("data"))?;

        let mut parts = BundleParts {
            metadata: bundle.get("metadata").cloned(),
            ..Default::default()
        };
        for kind in EntityKind::ALL {
            let records = match data.get(kind.collection_key()) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(records)) => records.clone(),
                Some(_) => {
                    parts.issues.push(
                        ValidationIssue::error(
                            ErrorCode::InvalidFieldType,
                            format!("data.{} must be an array", kind.collection_key()),
                        )
                        .field(kind.collection_key()),
                    );
                    Vec::new()
                }
            };
            parts.sections.insert(kind, records);
        }
        Ok(parts)
    }

    pub fn record_count(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }
}

/// Validated records plus every issue found.
#[derive(Debug, Clone, Default)]
pub struct ValidatedBundle {
    pub metadata: Option<BundleMetadata>,
    pub collection: EntityCollection,
    pub issues: Vec<ValidationIssue>,
}

impl ValidatedBundle {
    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.len() - self.error_count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    /// An unreadable bundle version blocks everything.
    pub fn has_schema_error(&self) -> bool {
        self.errors().any(|i| i.code == ErrorCode::SchemaVersion)
    }

    /// Whether the error count is over the caller's limit (`None` = no limit).
    pub fn exceeds_threshold(&self, threshold: Option<usize>) -> bool {
        threshold.is_some_and(|limit| self.error_count() > limit)
    }
}

/// Validate every record that `include` selects.
///
/// `include` is called with the record's kind and identifier (when it has a
/// usable one); records it rejects are neither validated nor returned.
pub fn validate_parts(
    parts: &BundleParts,
    include: impl Fn(EntityKind, Option<&str>) -> bool,
) -> ValidatedBundle {
    let mut validated = ValidatedBundle {
        issues: parts.issues.clone(),
        ..Default::default()
    };

    let metadata = check_metadata(parts, &mut validated.issues);
    if validated.has_schema_error() {
        return validated;
    }
    validated.metadata = metadata;

    let mut seen: HashMap<String, EntityKind> = HashMap::new();
    for (kind, records) in &parts.sections {
        let kind = *kind;
        for (index, raw) in records.iter().enumerate() {
            let id = raw.get("id").and_then(Value::as_str).filter(|s| !s.trim().is_empty());
            if !include(kind, id) {
                continue;
            }
            match validate_record(kind, index, raw) {
                Ok((entity, warnings)) => {
                    validated.issues.extend(warnings);
                    if let Some(first) = seen.get(entity.id()) {
                        validated.issues.push(
                            ValidationIssue::error(
                                ErrorCode::DuplicateIdInBundle,
                                format!(
                                    "{} {} duplicates an identifier already used by a {} in this bundle",
                                    kind,
                                    entity.id(),
                                    first
                                ),
                            )
                            .at(kind, index, Some(entity.id()))
                            .field("id"),
                        );
                        continue;
                    }
                    seen.insert(entity.id().to_string(), kind);
                    validated.collection.push(entity);
                }
                Err(issues) => validated.issues.extend(issues),
            }
        }
    }

    validated
}

fn check_metadata(parts: &BundleParts, issues: &mut Vec<ValidationIssue>) -> Option<BundleMetadata> {
    let Some(raw) = &parts.metadata else {
        issues.push(ValidationIssue::warning(
            ErrorCode::MetadataMismatch,
            "bundle has no metadata; assuming the current format",
        ));
        return None;
    };

    let version = raw.get("version").and_then(Value::as_str);
    match version {
        Some(version) if !is_supported_version(version) => {
            issues.push(
                ValidationIssue::error(
                    ErrorCode::SchemaVersion,
                    format!(
                        "bundle version {} cannot be read (supported: {}.x)",
                        version, SUPPORTED_MAJOR_VERSION
                    ),
                )
                .field("metadata.version"),
            );
            return None;
        }
        Some(_) => {}
        None => issues.push(
            ValidationIssue::warning(
                ErrorCode::SchemaVersion,
                "bundle metadata has no version; assuming the current format",
            )
            .field("metadata.version"),
        ),
    }

    let metadata: BundleMetadata = match serde_json::from_value(raw.clone()) {
        Ok(metadata) => metadata,
        Err(e) => {
            issues.push(ValidationIssue::warning(
                ErrorCode::MetadataMismatch,
                format!("bundle metadata is incomplete: {}", e),
            ));
            return None;
        }
    };

    for (kind, records) in &parts.sections {
        if let Some(&declared) = metadata.entity_counts.get(kind.collection_key())
            && declared != records.len()
        {
            issues.push(
                ValidationIssue::warning(
                    ErrorCode::MetadataMismatch,
                    format!(
                        "metadata declares {} {} but the bundle holds {}",
                        declared,
                        kind.collection_key(),
                        records.len()
                    ),
                )
                .field("metadata.entityCounts"),
            );
        }
    }
    if metadata.total_items != parts.record_count() {
        issues.push(
            ValidationIssue::warning(
                ErrorCode::MetadataMismatch,
                format!(
                    "metadata declares {} items but the bundle holds {}",
                    metadata.total_items,
                    parts.record_count()
                ),
            )
            .field("metadata.totalItems"),
        );
    }

    Some(metadata)
}

fn required_fields(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Goal | EntityKind::Project | EntityKind::Task => &["id", "title", "createdAt"],
        EntityKind::Thought => &["id", "content", "createdAt"],
        EntityKind::Mood => &["id", "rating", "recordedAt", "createdAt"],
        EntityKind::FocusSession => &[
            "id",
            "taskId",
            "startedAt",
            "durationMinutes",
            "createdAt",
        ],
        EntityKind::Person => &["id", "name", "createdAt"],
    }
}

fn validate_record(
    kind: EntityKind,
    index: usize,
    raw: &Value,
) -> Result<(Entity, Vec<ValidationIssue>), Vec<ValidationIssue>> {
    let Some(object) = raw.as_object() else {
        return Err(vec![
            ValidationIssue::error(
                ErrorCode::InvalidFieldType,
                format!("{} record #{} is not an object", kind, index),
            )
            .at(kind, index, None),
        ]);
    };
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty());

    let missing: Vec<ValidationIssue> = required_fields(kind)
        .iter()
        .filter(|field| {
            object.get(**field).is_none_or(Value::is_null)
                || (**field == "id" && id.is_none())
        })
        .map(|field| {
            ValidationIssue::error(
                ErrorCode::MissingRequiredField,
                format!("{} record #{} is missing {}", kind, index, field),
            )
            .at(kind, index, id)
            .field(field)
        })
        .collect();
    if !missing.is_empty() {
        return Err(missing);
    }

    let entity = Entity::from_record_json(kind, raw.clone()).map_err(|e| {
        vec![
            ValidationIssue::error(
                ErrorCode::InvalidFieldType,
                format!("{} {}: {}", kind, id.unwrap_or("?"), e),
            )
            .at(kind, index, id),
        ]
    })?;

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let invalid = |field: &str, message: String| {
        ValidationIssue::error(ErrorCode::InvalidFieldValue, message)
            .at(kind, index, Some(entity.id()))
            .field(field)
    };

    match &entity {
        Entity::Goal(g) if g.title.trim().is_empty() => {
            errors.push(invalid("title", format!("goal {} has an empty title", g.id)));
        }
        Entity::Project(p) if p.title.trim().is_empty() => {
            errors.push(invalid("title", format!("project {} has an empty title", p.id)));
        }
        Entity::Task(t) if t.title.trim().is_empty() => {
            errors.push(invalid("title", format!("task {} has an empty title", t.id)));
        }
        Entity::Thought(t) if t.content.trim().is_empty() => {
            errors.push(invalid("content", format!("thought {} is empty", t.id)));
        }
        Entity::Mood(m) if !(1..=5).contains(&m.rating) => {
            errors.push(invalid(
                "rating",
                format!("mood {} has rating {} (expected 1-5)", m.id, m.rating),
            ));
        }
        Entity::FocusSession(f) if f.duration_minutes == 0 => {
            errors.push(invalid(
                "durationMinutes",
                format!("focus session {} has zero duration", f.id),
            ));
        }
        Entity::Person(p) if p.name.trim().is_empty() => {
            errors.push(invalid("name", format!("person {} has no name", p.id)));
        }
        _ => {}
    }

    if let Some(updated) = entity.updated_at()
        && updated < entity.created_at()
    {
        warnings.push(
            ValidationIssue::warning(
                ErrorCode::InvalidFieldValue,
                format!("{} {} was updated before it was created", kind, entity.id()),
            )
            .at(kind, index, Some(entity.id()))
            .field("updatedAt"),
        );
    }

    if errors.is_empty() {
        Ok((entity, warnings))
    } else {
        errors.extend(warnings);
        Err(errors)
    }
}
