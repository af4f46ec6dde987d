//! Conflict detection between an incoming collection and current data.
//!
//! Four conflict types are reported:
//!
//! - `duplicate-id`: the identifier already exists and the incoming version
//!   is not lower. Suggested: merge when the incoming record is newer,
//!   otherwise skip.
//! - `version-mismatch`: the identifier exists with a higher version.
//!   Suggested: skip.
//! - `broken-reference`: a referenced identifier exists in neither the
//!   incoming nor the current data. Suggested: skip for required references,
//!   clear-reference otherwise.
//! - `data-constraint`: a same-kind parent cycle had to be broken to order
//!   the import. Suggested: accept.
//!
//! An identifier collision yields exactly one of `duplicate-id` or
//! `version-mismatch`. Identifiers are unique across kinds, so an incoming
//! record whose id belongs to an existing record of another kind is a
//! `duplicate-id` that only `skip` or `create-new` can resolve.

use super::relationships::RelationshipMap;
use crate::types::{Entity, EntityCollection, EntityKind, RefField};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    DuplicateId,
    VersionMismatch,
    BrokenReference,
    DataConstraint,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::DuplicateId => "duplicate-id",
            ConflictType::VersionMismatch => "version-mismatch",
            ConflictType::BrokenReference => "broken-reference",
            ConflictType::DataConstraint => "data-constraint",
        }
    }

    /// Identifier collisions with an existing record.
    pub fn is_collision(&self) -> bool {
        matches!(self, ConflictType::DuplicateId | ConflictType::VersionMismatch)
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to handle a conflicting entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Do not write the incoming entity.
    Skip,
    /// Overwrite the existing record.
    Replace,
    /// Field-wise union with the existing record, newer values winning.
    Merge,
    /// Write under a freshly generated identifier.
    CreateNew,
    /// Write with the broken reference removed.
    ClearReference,
    /// Write as-is.
    Accept,
    /// Defer to the user. Blocks the entity.
    AskUser,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Skip => "skip",
            Resolution::Replace => "replace",
            Resolution::Merge => "merge",
            Resolution::CreateNew => "create-new",
            Resolution::ClearReference => "clear-reference",
            Resolution::Accept => "accept",
            Resolution::AskUser => "ask-user",
        }
    }

    /// Whether this resolution makes sense for a conflict type.
    pub fn applies_to(&self, conflict_type: ConflictType) -> bool {
        match self {
            Resolution::Skip | Resolution::AskUser => true,
            Resolution::Replace | Resolution::Merge | Resolution::CreateNew => {
                conflict_type.is_collision()
            }
            Resolution::ClearReference => conflict_type == ConflictType::BrokenReference,
            Resolution::Accept => conflict_type == ConflictType::DataConstraint,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "skip" => Ok(Resolution::Skip),
            "replace" | "overwrite" => Ok(Resolution::Replace),
            "merge" => Ok(Resolution::Merge),
            "create-new" | "new" => Ok(Resolution::CreateNew),
            "clear-reference" | "clear" => Ok(Resolution::ClearReference),
            "accept" => Ok(Resolution::Accept),
            "ask-user" | "ask" => Ok(Resolution::AskUser),
            other => Err(format!("Unknown resolution: {}", other)),
        }
    }
}

/// One detected conflict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Stable key used to address this conflict when choosing a resolution.
    pub id: String,
    pub conflict_type: ConflictType,
    pub kind: EntityKind,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<RefField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub message: String,
    pub suggested: Resolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_version: Option<u64>,
    /// Kind of the stored record an identifier collision is against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_kind: Option<EntityKind>,
}

impl Conflict {
    fn new(
        conflict_type: ConflictType,
        entity: &Entity,
        field: Option<RefField>,
        target_id: Option<&str>,
        suggested: Resolution,
        message: String,
    ) -> Self {
        let mut id = format!("{}:{}:{}", conflict_type, entity.kind(), entity.id());
        if let (Some(field), Some(target)) = (field, target_id) {
            id.push_str(&format!(":{}:{}", field.name(), target));
        }
        Self {
            id,
            conflict_type,
            kind: entity.kind(),
            entity_id: entity.id().to_string(),
            field,
            target_id: target_id.map(String::from),
            message,
            suggested,
            chosen: None,
            incoming_version: entity.version(),
            existing_version: None,
            existing_kind: None,
        }
    }

    /// The colliding stored record is of a different kind.
    pub fn is_cross_kind(&self) -> bool {
        self.existing_kind.is_some_and(|kind| kind != self.kind)
    }

    /// Whether `resolution` can settle this particular conflict.
    pub fn allows(&self, resolution: Resolution) -> bool {
        if self.is_cross_kind() && matches!(resolution, Resolution::Replace | Resolution::Merge) {
            return false;
        }
        resolution.applies_to(self.conflict_type)
    }
}

/// Caller-supplied fallbacks for conflicts without an explicit choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDefaults {
    #[serde(default)]
    pub by_type: BTreeMap<ConflictType, Resolution>,
    /// Fall back to each conflict's suggestion.
    #[serde(default = "default_accept_suggestions")]
    pub accept_suggestions: bool,
}

fn default_accept_suggestions() -> bool {
    true
}

impl Default for ConflictDefaults {
    fn default() -> Self {
        Self {
            by_type: BTreeMap::new(),
            accept_suggestions: true,
        }
    }
}

impl ConflictDefaults {
    /// No fallbacks: every conflict needs an explicit choice.
    pub fn strict() -> Self {
        Self {
            by_type: BTreeMap::new(),
            accept_suggestions: false,
        }
    }

    pub fn with_default(mut self, conflict_type: ConflictType, resolution: Resolution) -> Self {
        self.by_type.insert(conflict_type, resolution);
        self
    }
}

/// All conflicts for one analysis, with their resolutions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    conflicts: Vec<Conflict>,
    #[serde(skip)]
    defaults: ConflictDefaults,
}

impl ConflictReport {
    pub fn new(mut conflicts: Vec<Conflict>) -> Self {
        conflicts.sort_by(|a, b| {
            (a.kind, &a.entity_id, a.field, &a.target_id, a.conflict_type).cmp(&(
                b.kind,
                &b.entity_id,
                b.field,
                &b.target_id,
                b.conflict_type,
            ))
        });
        Self {
            conflicts,
            defaults: ConflictDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: ConflictDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &ConflictDefaults {
        &self.defaults
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn total(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn counts_by_type(&self) -> BTreeMap<ConflictType, usize> {
        let mut counts = BTreeMap::new();
        for conflict in &self.conflicts {
            *counts.entry(conflict.conflict_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn get(&self, conflict_id: &str) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.id == conflict_id)
    }

    /// Record an explicit choice. Returns false for unknown conflicts or
    /// resolutions that do not apply to the conflict's type.
    pub fn resolve(&mut self, conflict_id: &str, resolution: Resolution) -> bool {
        match self.conflicts.iter_mut().find(|c| c.id == conflict_id) {
            Some(conflict) if conflict.allows(resolution) => {
                conflict.chosen = Some(resolution);
                true
            }
            _ => false,
        }
    }

    /// Explicit choice, else the per-type default, else the suggestion when
    /// suggestions are accepted.
    pub fn final_resolution(&self, conflict: &Conflict) -> Option<Resolution> {
        conflict
            .chosen
            .or_else(|| {
                self.defaults
                    .by_type
                    .get(&conflict.conflict_type)
                    .copied()
                    .filter(|r| conflict.allows(*r))
            })
            .or_else(|| {
                self.defaults
                    .accept_suggestions
                    .then_some(conflict.suggested)
            })
    }

    pub fn is_blocking(&self, conflict: &Conflict) -> bool {
        matches!(
            self.final_resolution(conflict),
            None | Some(Resolution::AskUser)
        )
    }

    pub fn has_blocking_conflicts(&self) -> bool {
        self.conflicts.iter().any(|c| self.is_blocking(c))
    }

    pub fn blocking(&self) -> Vec<&Conflict> {
        self.conflicts.iter().filter(|c| self.is_blocking(c)).collect()
    }

    /// Conflicts raised against one incoming entity.
    pub fn for_entity<'a>(&'a self, entity_id: &'a str) -> impl Iterator<Item = &'a Conflict> + 'a {
        self.conflicts.iter().filter(move |c| c.entity_id == entity_id)
    }

    /// Drop conflicts that no longer apply.
    pub fn retain(&mut self, keep: impl FnMut(&Conflict) -> bool) {
        self.conflicts.retain(keep);
    }
}

/// Compare `incoming` against `existing` and report every conflict.
///
/// Cycle breaks from `relationships` are reported as data-constraint
/// conflicts.
pub fn detect_conflicts(
    incoming: &EntityCollection,
    existing: &EntityCollection,
    relationships: &RelationshipMap,
) -> ConflictReport {
    let existing_index = existing.index();
    let incoming_kinds: HashMap<String, EntityKind> = incoming
        .entities()
        .into_iter()
        .map(|e| (e.id().to_string(), e.kind()))
        .collect();
    let mut conflicts = Vec::new();

    for entity in incoming.entities() {
        if let Some(current) = existing_index.get(entity.id()) {
            let conflict = if current.kind() == entity.kind() {
                collision(&entity, current)
            } else {
                cross_kind_collision(&entity, current)
            };
            conflicts.push(conflict);
        }

        for reference in entity.references() {
            let target_kind = reference.field.target();
            let known = incoming_kinds.get(&reference.target_id) == Some(&target_kind)
                || existing_index
                    .get(&reference.target_id)
                    .is_some_and(|e| e.kind() == target_kind);
            if known {
                continue;
            }
            let suggested = if reference.field.is_required() {
                Resolution::Skip
            } else {
                Resolution::ClearReference
            };
            let message = format!(
                "{} {} references missing {} {} via {}",
                entity.kind(),
                entity.id(),
                target_kind,
                reference.target_id,
                reference.field.name()
            );
            conflicts.push(Conflict::new(
                ConflictType::BrokenReference,
                &entity,
                Some(reference.field),
                Some(&reference.target_id),
                suggested,
                message,
            ));
        }
    }

    let incoming_index = incoming.index();
    for cycle_break in relationships.cycle_breaks() {
        let Some(entity) = incoming_index.get(&cycle_break.entity_id) else {
            continue;
        };
        let message = format!(
            "{} parent cycle [{}] broken at {} -> {}",
            cycle_break.kind,
            cycle_break.cycle.join(", "),
            cycle_break.entity_id,
            cycle_break.target_id
        );
        conflicts.push(Conflict::new(
            ConflictType::DataConstraint,
            entity,
            Some(cycle_break.field),
            Some(&cycle_break.target_id),
            Resolution::Accept,
            message,
        ));
    }

    ConflictReport::new(conflicts)
}

fn collision(incoming: &Entity, existing: &Entity) -> Conflict {
    let older_version = matches!(
        (incoming.version(), existing.version()),
        (Some(theirs), Some(ours)) if theirs < ours
    );

    let mut conflict = if older_version {
        Conflict::new(
            ConflictType::VersionMismatch,
            incoming,
            None,
            None,
            Resolution::Skip,
            format!(
                "{} {} is at version {} but the bundle carries version {}",
                incoming.kind(),
                incoming.id(),
                existing.version().unwrap_or_default(),
                incoming.version().unwrap_or_default()
            ),
        )
    } else {
        let newer = incoming.modified_at() > existing.modified_at();
        Conflict::new(
            ConflictType::DuplicateId,
            incoming,
            None,
            None,
            if newer {
                Resolution::Merge
            } else {
                Resolution::Skip
            },
            format!(
                "{} {} already exists ({})",
                incoming.kind(),
                incoming.id(),
                if newer {
                    "incoming is newer"
                } else {
                    "existing is current"
                }
            ),
        )
    };
    conflict.existing_version = existing.version();
    conflict.existing_kind = Some(existing.kind());
    conflict
}

/// The id is taken by a record of another kind. Versions are not comparable,
/// so the incoming record is written under a fresh id by default.
fn cross_kind_collision(incoming: &Entity, existing: &Entity) -> Conflict {
    let mut conflict = Conflict::new(
        ConflictType::DuplicateId,
        incoming,
        None,
        None,
        Resolution::CreateNew,
        format!(
            "{} {} collides with existing {} {}",
            incoming.kind(),
            incoming.id(),
            existing.kind(),
            existing.id()
        ),
    );
    conflict.existing_version = existing.version();
    conflict.existing_kind = Some(existing.kind());
    conflict
}
