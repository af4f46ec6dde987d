//! The import state machine.
//!
//! ```text
//! parsing -> validating -> detecting-conflicts -> preparing
//!   -> importing[goal] -> ... -> importing[person]
//!   -> updating-references -> completing -> completed
//! ```
//!
//! Any phase may end in `failed`; the importing and updating-references
//! phases may also end in `cancelled`. Entities are written one at a time,
//! each store call awaited before the next entity starts. Entities already
//! written stay written whatever the terminal state.

use super::backup::{BackupSink, BackupSnapshot, PRE_IMPORT_TAG};
use super::conflicts::{ConflictDefaults, ConflictReport, ConflictType, Resolution, detect_conflicts};
use super::merge::merge_entities;
use super::progress::{ImportPhase, KindProgress, Outcome, ProgressCallback, ProgressTracker};
use super::relationships::map_relationships;
use super::remap::{IdGenerator, IdMapping, PetnameIdGenerator, generate_unique};
use super::validation::{BundleParts, ValidationIssue, validate_parts};
use crate::error::{ErrorCode, ImportError, StoreError};
use crate::export::ExportedBundle;
use crate::logging::{ImportLogger, LogEntry, LogLevelFilter};
use crate::store::StoreRegistry;
use crate::types::{Entity, EntityCollection, EntityKind, RefField, RefUpdate};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Options for one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Keep incoming identifiers. When false every written entity gets a
    /// fresh identifier.
    pub preserve_ids: bool,
    /// Snapshot current data before the first write.
    pub create_backup: bool,
    /// Kinds to import (`None` = all).
    pub kinds: Option<BTreeSet<EntityKind>>,
    /// Identifier allow-list (`None` = everything).
    pub selection: Option<HashSet<String>>,
    /// Explicit choices keyed by conflict id.
    pub resolutions: HashMap<String, Resolution>,
    pub defaults: ConflictDefaults,
    /// Maximum validation errors tolerated (`None` = no limit).
    pub error_threshold: Option<usize>,
    /// Stop after planning; nothing is written.
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            preserve_ids: true,
            create_backup: false,
            kinds: None,
            selection: None,
            resolutions: HashMap::new(),
            defaults: ConflictDefaults::default(),
            error_threshold: None,
            dry_run: false,
        }
    }
}

impl ImportOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }

    pub fn with_fresh_ids(mut self) -> Self {
        self.preserve_ids = false;
        self
    }

    pub fn with_backup(mut self) -> Self {
        self.create_backup = true;
        self
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_selection<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.selection = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_resolution(mut self, conflict_id: impl Into<String>, resolution: Resolution) -> Self {
        self.resolutions.insert(conflict_id.into(), resolution);
        self
    }

    pub fn with_defaults(mut self, defaults: ConflictDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_error_threshold(mut self, threshold: usize) -> Self {
        self.error_threshold = Some(threshold);
        self
    }

    /// Whether a record is in scope for this run.
    pub fn includes(&self, kind: EntityKind, id: Option<&str>) -> bool {
        let kind_ok = self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&kind));
        let id_ok = self
            .selection
            .as_ref()
            .is_none_or(|selected| id.is_some_and(|id| selected.contains(id)));
        kind_ok && id_ok
    }
}

/// Cooperative cancellation flag, checked once per entity.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    Add,
    Replace,
    Merge,
    Skip,
}

/// One line of the write plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedWrite {
    pub kind: EntityKind,
    pub original_id: String,
    pub written_id: String,
    pub action: WriteAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Terminal report of an import run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Completed with no failed entities.
    pub success: bool,
    pub cancelled: bool,
    pub dry_run: bool,
    pub phase: ImportPhase,
    pub per_kind: BTreeMap<EntityKind, KindProgress>,
    pub items_processed: usize,
    pub items_total: usize,
    pub errors: Vec<ImportError>,
    pub warnings: Vec<String>,
    pub logs: Vec<LogEntry>,
    pub validation: Vec<ValidationIssue>,
    pub conflicts: ConflictReport,
    pub id_mapping: IdMapping,
    pub plan: Vec<PlannedWrite>,
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
}

impl ImportResult {
    pub fn imported(&self, kind: EntityKind) -> usize {
        self.per_kind.get(&kind).map_or(0, |k| k.imported)
    }

    pub fn skipped(&self, kind: EntityKind) -> usize {
        self.per_kind.get(&kind).map_or(0, |k| k.skipped)
    }

    pub fn failed(&self, kind: EntityKind) -> usize {
        self.per_kind.get(&kind).map_or(0, |k| k.failed)
    }

    pub fn total_imported(&self) -> usize {
        self.per_kind.values().map(|k| k.imported).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.per_kind.values().map(|k| k.skipped).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.per_kind.values().map(|k| k.failed).sum()
    }

    /// Planned writes that would change the store.
    pub fn planned_writes(&self) -> impl Iterator<Item = &PlannedWrite> {
        self.plan.iter().filter(|p| p.action != WriteAction::Skip)
    }
}

/// Drives imports against a set of stores.
pub struct ImportExecutor {
    stores: StoreRegistry,
    id_generator: Box<dyn IdGenerator>,
    backup_sink: Option<Arc<dyn BackupSink>>,
    on_progress: Option<ProgressCallback>,
    cancel: CancellationHandle,
    level_filter: Arc<LogLevelFilter>,
}

impl ImportExecutor {
    pub fn new(stores: StoreRegistry) -> Self {
        Self {
            stores,
            id_generator: Box::new(PetnameIdGenerator::default()),
            backup_sink: None,
            on_progress: None,
            cancel: CancellationHandle::new(),
            level_filter: Arc::new(LogLevelFilter::default()),
        }
    }

    pub fn with_id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Box::new(generator);
        self
    }

    pub fn with_backup_sink(mut self, sink: Arc<dyn BackupSink>) -> Self {
        self.backup_sink = Some(sink);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_log_level_filter(mut self, filter: Arc<LogLevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    /// Handle that cancels the current (or next) run.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    pub fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    /// Import a typed bundle.
    pub async fn run_bundle(&mut self, bundle: &ExportedBundle, options: &ImportOptions) -> ImportResult {
        let value = bundle.to_value().unwrap_or(Value::Null);
        self.run(&value, options).await
    }

    /// Import a bundle given as raw JSON.
    pub async fn run(&mut self, bundle: &Value, options: &ImportOptions) -> ImportResult {
        let logger = ImportLogger::new()
            .with_level_filter(Arc::clone(&self.level_filter))
            .with_name("import");
        let mut run = RunState {
            tracker: ProgressTracker::new(logger, self.on_progress.clone()),
            validation: Vec::new(),
            conflicts: ConflictReport::default(),
            id_mapping: IdMapping::new(),
            plan: Vec::new(),
            backup_id: None,
            dry_run: options.dry_run,
        };

        let phase = match self.execute(bundle, options, &mut run).await {
            Ok(()) => ImportPhase::Completed,
            Err(Halt::Failed) => ImportPhase::Failed,
            Err(Halt::Cancelled) => ImportPhase::Cancelled,
        };
        run.finish(phase)
    }

    async fn execute(
        &mut self,
        bundle: &Value,
        options: &ImportOptions,
        run: &mut RunState,
    ) -> Result<(), Halt> {
        // parsing
        run.tracker.enter(ImportPhase::Parsing);
        let parts = BundleParts::parse(bundle).map_err(|e| {
            run.fail(ImportError::new(
                ErrorCode::MalformedBundle,
                format!("Cannot parse bundle: {}", e),
            ))
        })?;

        // validating
        run.tracker.enter(ImportPhase::Validating);
        let validated = validate_parts(&parts, |kind, id| options.includes(kind, id));
        for issue in &validated.issues {
            if issue.is_error() {
                run.tracker.error(issue.to_import_error());
            } else {
                run.tracker.warn(issue.message.clone());
            }
        }
        run.validation = validated.issues.clone();
        if validated.has_schema_error() {
            return Err(Halt::Failed);
        }
        if validated.exceeds_threshold(options.error_threshold) {
            return Err(run.fail(ImportError::new(
                ErrorCode::ErrorThresholdExceeded,
                format!(
                    "{} validation errors exceed the limit of {}; nothing was written",
                    validated.error_count(),
                    options.error_threshold.unwrap_or_default()
                ),
            )));
        }
        let (error_count, warning_count) = (validated.error_count(), validated.warning_count());
        let incoming = validated.collection;
        run.tracker.info(&format!(
            "Validated {} records ({} errors, {} warnings)",
            incoming.len(),
            error_count,
            warning_count
        ));

        // detecting-conflicts
        run.tracker.enter(ImportPhase::DetectingConflicts);
        let existing = self.stores.collection().await.map_err(|e| {
            run.fail(ImportError::new(
                store_error_code(&e),
                format!("Cannot read current notebook: {}", e),
            ))
        })?;
        let relationships = map_relationships(&incoming);
        let mut report = detect_conflicts(&incoming, &existing, &relationships)
            .with_defaults(options.defaults.clone());
        if !options.preserve_ids {
            // Fresh identifiers cannot collide with existing records.
            report.retain(|c| !c.conflict_type.is_collision());
        }
        for (conflict_id, resolution) in &options.resolutions {
            if !report.resolve(conflict_id, *resolution) {
                run.tracker.warn(format!(
                    "Ignoring resolution {} for {}: no such conflict, or it does not apply",
                    resolution, conflict_id
                ));
            }
        }
        if !report.is_empty() {
            let counts: Vec<String> = report
                .counts_by_type()
                .iter()
                .map(|(t, n)| format!("{} {}", n, t))
                .collect();
            run.tracker
                .info(&format!("Detected conflicts: {}", counts.join(", ")));
        }
        run.conflicts = report;

        // preparing
        run.tracker.enter(ImportPhase::Preparing);
        let entries = self.prepare(&incoming, &existing, &relationships, options, run);
        run.plan = entries.iter().map(PlanEntry::planned).collect();
        for kind in EntityKind::ALL {
            let total = entries.iter().filter(|e| e.kind == kind).count();
            if total > 0 {
                run.tracker.set_total(kind, total);
            }
        }

        if options.dry_run {
            let writes = entries.iter().filter(|e| e.action != WriteAction::Skip).count();
            run.tracker.info(&format!(
                "Dry run: {} of {} records would be written",
                writes,
                entries.len()
            ));
            for entry in &entries {
                if entry.action != WriteAction::Skip {
                    run.id_mapping.insert(&entry.original_id, &entry.written_id);
                }
            }
            return Ok(());
        }

        if options.create_backup {
            run.backup_id = Some(self.backup(run).await?);
        }

        // importing[kind]
        let mut ctx = WriteContext {
            written: HashMap::new(),
            pending: entries
                .iter()
                .filter(|e| e.action != WriteAction::Skip)
                .map(|e| (e.original_id.clone(), e.kind))
                .collect(),
            existing: existing
                .entities()
                .into_iter()
                .map(|e| (e.id().to_string(), e.kind()))
                .collect(),
        };
        let mut patches: Vec<Patch> = Vec::new();

        for kind in EntityKind::ALL {
            let kind_entries: Vec<&PlanEntry> = entries.iter().filter(|e| e.kind == kind).collect();
            if kind_entries.is_empty() {
                continue;
            }
            run.tracker.enter(ImportPhase::Importing(kind));
            for entry in kind_entries {
                if self.cancel.is_cancelled() {
                    run.tracker.warn(format!(
                        "Import cancelled after {} of {} records",
                        run.tracker.items_processed(),
                        run.tracker.items_total()
                    ));
                    return Err(Halt::Cancelled);
                }
                ctx.pending.remove(&entry.original_id);
                if let Some(patch) = self.write_entry(entry, &mut ctx, run).await? {
                    patches.push(patch);
                }
            }
        }

        // updating-references
        run.tracker.enter(ImportPhase::UpdatingReferences);
        self.patch_references(patches, &ctx, run).await?;

        // completing
        run.tracker.enter(ImportPhase::Completing);
        let imported: usize = run.tracker.per_kind().values().map(|k| k.imported).sum();
        let skipped: usize = run.tracker.per_kind().values().map(|k| k.skipped).sum();
        let failed: usize = run.tracker.per_kind().values().map(|k| k.failed).sum();
        run.tracker.info(&format!(
            "Import finished: {} imported, {} skipped, {} failed",
            imported, skipped, failed
        ));
        Ok(())
    }

    /// Decide what happens to every incoming entity, in import order.
    fn prepare(
        &mut self,
        incoming: &EntityCollection,
        existing: &EntityCollection,
        relationships: &super::relationships::RelationshipMap,
        options: &ImportOptions,
        run: &mut RunState,
    ) -> Vec<PlanEntry> {
        let incoming_index = incoming.index();
        let existing_index = existing.index();
        let mut taken: HashSet<String> = existing_index.keys().cloned().collect();
        taken.extend(incoming_index.keys().cloned());

        let mut entries = Vec::new();
        for kind in relationships.import_order().kinds() {
            for id in relationships.order_for(kind) {
                let Some(entity) = incoming_index.get(id) else {
                    continue;
                };
                let entry = self.plan_entity(entity, &existing_index, options, &mut taken, run);
                entries.push(entry);
            }
        }
        entries
    }

    fn plan_entity(
        &mut self,
        incoming: &Entity,
        existing_index: &HashMap<String, Entity>,
        options: &ImportOptions,
        taken: &mut HashSet<String>,
        run: &mut RunState,
    ) -> PlanEntry {
        let kind = incoming.kind();
        let id = incoming.id().to_string();
        let mut entry = PlanEntry {
            kind,
            original_id: id.clone(),
            written_id: id.clone(),
            action: WriteAction::Add,
            entity: incoming.clone(),
            reason: None,
            error: None,
            failed: false,
        };
        let mut create_new = !options.preserve_ids;

        let report = &run.conflicts;
        for conflict in report.for_entity(&id) {
            let resolution = report.final_resolution(conflict);
            match (conflict.conflict_type, resolution) {
                (_, None) | (_, Some(Resolution::AskUser)) => {
                    return entry.skip(
                        format!("unresolved {} conflict", conflict.conflict_type),
                        Some(ImportError::blocked(
                            kind,
                            &id,
                            &format!("unresolved {} conflict", conflict.conflict_type),
                        )),
                    );
                }
                (_, Some(Resolution::Skip)) => {
                    return entry.skip(format!("{} resolved as skip", conflict.conflict_type), None);
                }
                (t, Some(Resolution::Replace)) if t.is_collision() => {
                    entry.action = WriteAction::Replace;
                }
                (t, Some(Resolution::Merge)) if t.is_collision() => {
                    entry.action = WriteAction::Merge;
                }
                (t, Some(Resolution::CreateNew)) if t.is_collision() => {
                    create_new = true;
                }
                (ConflictType::BrokenReference, Some(Resolution::ClearReference)) => {
                    let (Some(field), Some(target)) = (conflict.field, conflict.target_id.as_deref())
                    else {
                        continue;
                    };
                    if field.is_required() {
                        return entry.skip(
                            format!("required {} cannot be cleared", field.name()),
                            Some(ImportError::dangling_required(kind, &id, target)),
                        );
                    }
                    entry.entity.clear_reference(field, target);
                }
                (ConflictType::DataConstraint, Some(Resolution::Accept)) => {}
                (t, Some(r)) => {
                    return entry.skip(
                        format!("{} does not apply to a {} conflict", r, t),
                        Some(ImportError::blocked(kind, &id, &format!("{} cannot resolve {}", r, t))),
                    );
                }
            }
        }

        match entry.action {
            WriteAction::Merge => {
                let Some(current) = existing_index.get(&id) else {
                    return entry.fail(ImportError::internal(format!("{} {} vanished before merge", kind, id)));
                };
                match merge_entities(current, &entry.entity) {
                    Ok(merged) => entry.entity = merged,
                    Err(e) => {
                        return entry.fail(
                            ImportError::new(ErrorCode::InvalidFieldValue, format!("merge failed: {}", e))
                                .with_entity(kind, &id),
                        );
                    }
                }
            }
            WriteAction::Add if create_new => {
                match generate_unique(self.id_generator.as_mut(), kind, |candidate| {
                    taken.contains(candidate)
                }) {
                    Ok(fresh) => {
                        taken.insert(fresh.clone());
                        entry.entity.set_id(fresh.clone());
                        entry.written_id = fresh;
                    }
                    Err(e) => return entry.fail(e.with_entity(kind, &id)),
                }
            }
            _ => {}
        }
        entry
    }

    async fn backup(&self, run: &mut RunState) -> Result<String, Halt> {
        let Some(sink) = &self.backup_sink else {
            return Err(run.fail(ImportError::new(
                ErrorCode::BackupFailed,
                "Backup requested but no backup sink is configured",
            )));
        };
        let snapshot = BackupSnapshot::capture(&self.stores, PRE_IMPORT_TAG)
            .await
            .map_err(|e| run.fail(ImportError::new(ErrorCode::BackupFailed, format!("Backup failed: {}", e))))?;
        let id = sink
            .save(&snapshot)
            .await
            .map_err(|e| run.fail(ImportError::new(ErrorCode::BackupFailed, format!("Backup failed: {}", e))))?;
        run.tracker.info(&format!(
            "Backed up {} records as {}",
            snapshot.total_items(),
            id
        ));
        Ok(id)
    }

    /// Write one planned entity. Returns a patch when some references had
    /// to be deferred.
    async fn write_entry(
        &self,
        entry: &PlanEntry,
        ctx: &mut WriteContext,
        run: &mut RunState,
    ) -> Result<Option<Patch>, Halt> {
        let kind = entry.kind;
        if entry.action == WriteAction::Skip {
            if let Some(err) = &entry.error {
                run.tracker.error(err.clone());
            } else if let Some(reason) = &entry.reason {
                debug!(kind = %kind, id = %entry.original_id, reason = %reason, "Skipping");
            }
            let outcome = if entry.failed {
                Outcome::Failed
            } else {
                Outcome::Skipped
            };
            run.tracker.record(kind, outcome);
            return Ok(None);
        }

        let mut to_write = entry.entity.clone();
        let resolved = ctx.resolve(&mut to_write);
        if let Some(target) = resolved.dangling_required {
            run.tracker
                .error(ImportError::dangling_required(kind, &entry.original_id, &target));
            run.tracker.record(kind, Outcome::Skipped);
            return Ok(None);
        }
        for (field, target) in &resolved.cleared {
            run.tracker.warn(format!(
                "{} {}: cleared {} -> {} (never written)",
                kind,
                entry.original_id,
                field.name(),
                target
            ));
        }

        let Some(store) = self.stores.get(kind).cloned() else {
            run.tracker.error(
                ImportError::new(ErrorCode::WriteRejected, format!("No store registered for {}", kind))
                    .with_entity(kind, &entry.original_id),
            );
            run.tracker.record(kind, Outcome::Failed);
            return Ok(None);
        };

        let result = match entry.action {
            WriteAction::Replace | WriteAction::Merge => store
                .replace(to_write.clone())
                .await
                .map(|()| entry.written_id.clone()),
            _ => store.add(to_write.clone()).await,
        };

        match result {
            Ok(stored_id) => {
                if stored_id != to_write.id() {
                    to_write.set_id(stored_id.clone());
                }
                run.id_mapping.insert(&entry.original_id, &stored_id);
                ctx.written
                    .insert(entry.original_id.clone(), (kind, stored_id.clone()));
                debug!(kind = %kind, id = %stored_id, action = ?entry.action, "Wrote entity");
                run.tracker.record(kind, Outcome::Imported);
                if resolved.deferred {
                    let mut base = entry.entity.clone();
                    base.set_id(stored_id);
                    return Ok(Some(Patch {
                        kind,
                        original_id: entry.original_id.clone(),
                        base,
                        written: to_write,
                    }));
                }
                Ok(None)
            }
            Err(e) => {
                run.tracker
                    .error(ImportError::from_store(kind, &entry.original_id, &e));
                run.tracker.record(kind, Outcome::Failed);
                if e.is_fatal() {
                    warn!(error = %e, "Unrecoverable store error, stopping import");
                    return Err(Halt::Failed);
                }
                Ok(None)
            }
        }
    }

    /// Re-resolve deferred references now that every referent has its
    /// final identifier. At most one replace per entity.
    async fn patch_references(
        &self,
        patches: Vec<Patch>,
        ctx: &WriteContext,
        run: &mut RunState,
    ) -> Result<(), Halt> {
        let mut patched = 0usize;
        for patch in patches {
            if self.cancel.is_cancelled() {
                run.tracker.warn("Import cancelled while updating references");
                return Err(Halt::Cancelled);
            }
            let mut entity = patch.base;
            let resolved = ctx.resolve(&mut entity);
            for (field, target) in &resolved.cleared {
                run.tracker.warn(format!(
                    "{} {}: left {} -> {} cleared (never written)",
                    patch.kind,
                    patch.original_id,
                    field.name(),
                    target
                ));
            }
            if entity == patch.written {
                continue;
            }
            let Some(store) = self.stores.get(patch.kind).cloned() else {
                continue;
            };
            match store.replace(entity).await {
                Ok(()) => patched += 1,
                Err(e) => {
                    run.tracker
                        .error(ImportError::from_store(patch.kind, &patch.original_id, &e));
                    if e.is_fatal() {
                        return Err(Halt::Failed);
                    }
                }
            }
        }
        if patched > 0 {
            run.tracker
                .info(&format!("Patched deferred references on {} records", patched));
        }
        Ok(())
    }
}

enum Halt {
    Failed,
    Cancelled,
}

struct RunState {
    tracker: ProgressTracker,
    validation: Vec<ValidationIssue>,
    conflicts: ConflictReport,
    id_mapping: IdMapping,
    plan: Vec<PlannedWrite>,
    backup_id: Option<String>,
    dry_run: bool,
}

impl RunState {
    fn fail(&mut self, error: ImportError) -> Halt {
        self.tracker.error(error);
        Halt::Failed
    }

    fn finish(mut self, phase: ImportPhase) -> ImportResult {
        self.tracker.enter(phase);
        let per_kind = self.tracker.per_kind().clone();
        let items_processed = self.tracker.items_processed();
        let items_total = self.tracker.items_total();
        let duration = self.tracker.elapsed();
        let (logs, errors, warnings) = self.tracker.finish();
        let failed: usize = per_kind.values().map(|k| k.failed).sum();

        info!(
            phase = %phase,
            processed = items_processed,
            total = items_total,
            errors = errors.len(),
            "Import run ended"
        );

        ImportResult {
            success: phase == ImportPhase::Completed && failed == 0,
            cancelled: phase == ImportPhase::Cancelled,
            dry_run: self.dry_run,
            phase,
            per_kind,
            items_processed,
            items_total,
            errors,
            warnings,
            logs,
            validation: self.validation,
            conflicts: self.conflicts,
            id_mapping: self.id_mapping,
            plan: self.plan,
            duration,
            backup_id: self.backup_id,
        }
    }
}

struct PlanEntry {
    kind: EntityKind,
    original_id: String,
    written_id: String,
    action: WriteAction,
    /// Entity as it will be written, before reference rewriting.
    entity: Entity,
    reason: Option<String>,
    error: Option<ImportError>,
    /// Skipped because it could not be prepared (counts as failed).
    failed: bool,
}

impl PlanEntry {
    fn skip(mut self, reason: String, error: Option<ImportError>) -> Self {
        self.action = WriteAction::Skip;
        self.reason = Some(reason);
        self.error = error;
        self
    }

    fn fail(mut self, error: ImportError) -> Self {
        self.action = WriteAction::Skip;
        self.reason = Some(error.message.clone());
        self.error = Some(error);
        self.failed = true;
        self
    }

    fn planned(&self) -> PlannedWrite {
        PlannedWrite {
            kind: self.kind,
            original_id: self.original_id.clone(),
            written_id: self.written_id.clone(),
            action: self.action,
            reason: self.reason.clone(),
        }
    }
}

/// Write-time view of where every identifier stands.
struct WriteContext {
    /// original id -> (kind, stored id), for entities written in this run
    written: HashMap<String, (EntityKind, String)>,
    /// planned entities not yet processed
    pending: HashMap<String, EntityKind>,
    /// records that existed before the run
    existing: HashMap<String, EntityKind>,
}

#[derive(Default)]
struct Resolved {
    deferred: bool,
    dangling_required: Option<String>,
    cleared: Vec<(RefField, String)>,
}

impl WriteContext {
    /// Rewrite every reference of `entity` in place:
    /// written in this run -> stored id; still pending -> cleared and
    /// deferred; pre-existing -> kept; anything else is dangling.
    fn resolve(&self, entity: &mut Entity) -> Resolved {
        let mut resolved = Resolved::default();
        let fields: Vec<RefField> = entity.kind().reference_fields().collect();
        for field in fields {
            let target_kind = field.target();
            entity.map_reference(field, |target| {
                if let Some((kind, stored)) = self.written.get(target)
                    && *kind == target_kind
                {
                    return RefUpdate::Replace(stored.clone());
                }
                if self.pending.get(target) == Some(&target_kind) && !field.is_required() {
                    resolved.deferred = true;
                    return RefUpdate::Clear;
                }
                if self.existing.get(target) == Some(&target_kind) {
                    return RefUpdate::Keep;
                }
                if field.is_required() {
                    resolved.dangling_required = Some(target.to_string());
                    return RefUpdate::Keep;
                }
                resolved.cleared.push((field, target.to_string()));
                RefUpdate::Clear
            });
        }
        resolved
    }
}

struct Patch {
    kind: EntityKind,
    original_id: String,
    /// Planned entity under its stored id, references not yet rewritten.
    base: Entity,
    /// What was actually written.
    written: Entity,
}

fn store_error_code(err: &StoreError) -> ErrorCode {
    match err {
        StoreError::Unauthorized(_) => ErrorCode::Unauthorized,
        _ => ErrorCode::Unavailable,
    }
}
