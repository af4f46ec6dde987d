//! Import phases and progress reporting.

use crate::error::ImportError;
use crate::logging::{ImportLogger, LogEntry};
use crate::types::EntityKind;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executor state. Transitions are strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportPhase {
    Parsing,
    Validating,
    DetectingConflicts,
    Preparing,
    Importing(EntityKind),
    UpdatingReferences,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl ImportPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportPhase::Completed | ImportPhase::Failed | ImportPhase::Cancelled
        )
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportPhase::Parsing => write!(f, "parsing"),
            ImportPhase::Validating => write!(f, "validating"),
            ImportPhase::DetectingConflicts => write!(f, "detecting-conflicts"),
            ImportPhase::Preparing => write!(f, "preparing"),
            ImportPhase::Importing(kind) => write!(f, "importing[{}]", kind),
            ImportPhase::UpdatingReferences => write!(f, "updating-references"),
            ImportPhase::Completing => write!(f, "completing"),
            ImportPhase::Completed => write!(f, "completed"),
            ImportPhase::Failed => write!(f, "failed"),
            ImportPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Counters for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindProgress {
    pub total: usize,
    pub processed: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Snapshot handed to the progress callback.
///
/// `logs`, `errors` and `warnings` hold only the entries added since the
/// previous snapshot; the complete lists arrive in the final result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub phase: ImportPhase,
    /// 0-100, weighted by per-kind counts.
    pub overall_progress: f64,
    pub items_processed: usize,
    pub items_total: usize,
    pub per_kind: BTreeMap<EntityKind, KindProgress>,
    pub elapsed: Duration,
    pub estimated_remaining: Option<Duration>,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<ImportError>,
    pub warnings: Vec<String>,
}

/// Progress callback, invoked synchronously.
pub type ProgressCallback = Arc<dyn Fn(&ImportProgress) + Send + Sync>;

/// Outcome of one entity boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Imported,
    Skipped,
    Failed,
}

const RATE_WINDOW: usize = 10;

/// Accumulates counters, logs and errors for one run and emits snapshots.
pub struct ProgressTracker {
    phase: ImportPhase,
    started: Instant,
    per_kind: BTreeMap<EntityKind, KindProgress>,
    samples: VecDeque<(Instant, usize)>,
    logger: ImportLogger,
    errors: Vec<ImportError>,
    warnings: Vec<String>,
    /// Log, error and warning counts already handed to the callback.
    emitted: (usize, usize, usize),
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(logger: ImportLogger, callback: Option<ProgressCallback>) -> Self {
        Self {
            phase: ImportPhase::Parsing,
            started: Instant::now(),
            per_kind: BTreeMap::new(),
            samples: VecDeque::with_capacity(RATE_WINDOW),
            logger,
            errors: Vec::new(),
            warnings: Vec::new(),
            emitted: (0, 0, 0),
            callback,
        }
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    /// Move to the next phase and emit.
    pub fn enter(&mut self, phase: ImportPhase) {
        self.phase = phase;
        self.logger.debug(&format!("Phase: {}", phase));
        self.emit();
    }

    pub fn set_total(&mut self, kind: EntityKind, total: usize) {
        self.per_kind.entry(kind).or_default().total = total;
    }

    /// Record one entity boundary and emit.
    pub fn record(&mut self, kind: EntityKind, outcome: Outcome) {
        let counters = self.per_kind.entry(kind).or_default();
        counters.processed += 1;
        match outcome {
            Outcome::Imported => counters.imported += 1,
            Outcome::Skipped => counters.skipped += 1,
            Outcome::Failed => counters.failed += 1,
        }
        if self.samples.len() == RATE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back((Instant::now(), self.items_processed()));
        self.emit();
    }

    pub fn logger(&mut self) -> &mut ImportLogger {
        &mut self.logger
    }

    pub fn info(&mut self, message: &str) {
        self.logger.info(message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.logger.warning(&message);
        self.warnings.push(message);
    }

    pub fn error(&mut self, error: ImportError) {
        self.logger.error(&error.message);
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[ImportError] {
        &self.errors
    }

    pub fn items_processed(&self) -> usize {
        self.per_kind.values().map(|k| k.processed).sum()
    }

    pub fn items_total(&self) -> usize {
        self.per_kind.values().map(|k| k.total).sum()
    }

    pub fn per_kind(&self) -> &BTreeMap<EntityKind, KindProgress> {
        &self.per_kind
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn overall_progress(&self) -> f64 {
        if self.phase == ImportPhase::Completed {
            return 100.0;
        }
        let total = self.items_total();
        if total == 0 {
            return 0.0;
        }
        (self.items_processed() as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Remaining time from the moving average of recent throughput.
    fn estimated_remaining(&self) -> Option<Duration> {
        let remaining = self.items_total().saturating_sub(self.items_processed());
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let (first_at, first_count) = *self.samples.front()?;
        let (last_at, last_count) = *self.samples.back()?;
        let window = last_at.duration_since(first_at).as_secs_f64();
        let items = last_count.saturating_sub(first_count);
        if items == 0 || window <= 0.0 {
            return None;
        }
        let rate = items as f64 / window;
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// Current counters plus the entries not yet emitted.
    pub fn snapshot(&self) -> ImportProgress {
        let (logs, errors, warnings) = self.emitted;
        ImportProgress {
            phase: self.phase,
            overall_progress: self.overall_progress(),
            items_processed: self.items_processed(),
            items_total: self.items_total(),
            per_kind: self.per_kind.clone(),
            elapsed: self.elapsed(),
            estimated_remaining: self.estimated_remaining(),
            logs: self.logger.entries()[logs..].to_vec(),
            errors: self.errors[errors..].to_vec(),
            warnings: self.warnings[warnings..].to_vec(),
        }
    }

    pub fn emit(&mut self) {
        if let Some(callback) = &self.callback {
            callback(&self.snapshot());
            self.emitted = (
                self.logger.entries().len(),
                self.errors.len(),
                self.warnings.len(),
            );
        }
    }

    /// Consume the tracker, returning logs, errors and warnings.
    pub fn finish(self) -> (Vec<LogEntry>, Vec<ImportError>, Vec<String>) {
        (self.logger.into_entries(), self.errors, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_phase_display() {
        assert_eq!(
            ImportPhase::Importing(EntityKind::FocusSession).to_string(),
            "importing[focus_session]"
        );
        assert_eq!(ImportPhase::DetectingConflicts.to_string(), "detecting-conflicts");
        assert!(ImportPhase::Cancelled.is_terminal());
        assert!(!ImportPhase::Completing.is_terminal());
    }

    #[test]
    fn test_overall_progress_weighted_by_counts() {
        let mut tracker = ProgressTracker::new(ImportLogger::new(), None);
        tracker.set_total(EntityKind::Goal, 1);
        tracker.set_total(EntityKind::Task, 3);
        tracker.record(EntityKind::Goal, Outcome::Imported);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.items_processed, 1);
        assert_eq!(snapshot.items_total, 4);
        assert!((snapshot.overall_progress - 25.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.per_kind[&EntityKind::Goal].imported, 1);
    }

    #[test]
    fn test_callback_sees_every_boundary() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p: &ImportProgress| {
            sink.lock().unwrap().push((p.phase, p.items_processed));
        });

        let mut tracker = ProgressTracker::new(ImportLogger::new(), Some(callback));
        tracker.set_total(EntityKind::Task, 2);
        tracker.enter(ImportPhase::Importing(EntityKind::Task));
        tracker.record(EntityKind::Task, Outcome::Imported);
        tracker.record(EntityKind::Task, Outcome::Skipped);
        tracker.enter(ImportPhase::Completed);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2], (ImportPhase::Importing(EntityKind::Task), 2));
        assert_eq!(seen[3].0, ImportPhase::Completed);
    }

    #[test]
    fn test_eta_needs_samples() {
        let mut tracker = ProgressTracker::new(ImportLogger::new(), None);
        tracker.set_total(EntityKind::Mood, 10);
        assert_eq!(tracker.snapshot().estimated_remaining, None);

        tracker.record(EntityKind::Mood, Outcome::Imported);
        std::thread::sleep(Duration::from_millis(5));
        tracker.record(EntityKind::Mood, Outcome::Imported);
        let eta = tracker.snapshot().estimated_remaining;
        assert!(eta.is_some_and(|d| d > Duration::ZERO));
    }

    #[test]
    fn test_snapshots_carry_only_new_entries() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p: &ImportProgress| {
            sink.lock()
                .unwrap()
                .push((p.errors.len(), p.warnings.clone()));
        });

        let mut tracker = ProgressTracker::new(ImportLogger::new(), Some(callback));
        tracker.set_total(EntityKind::Task, 3);
        tracker.error(ImportError::internal("first"));
        tracker.record(EntityKind::Task, Outcome::Failed);
        tracker.warn("cleared projectId");
        tracker.record(EntityKind::Task, Outcome::Imported);
        tracker.record(EntityKind::Task, Outcome::Imported);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (1, vec![]));
        assert_eq!(seen[1], (0, vec!["cleared projectId".to_string()]));
        assert_eq!(seen[2], (0, vec![]));
        drop(seen);

        let (_, errors, warnings) = tracker.finish();
        assert_eq!(errors.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_warnings_and_errors_accumulate() {
        let mut tracker = ProgressTracker::new(ImportLogger::new(), None);
        tracker.warn("reference left cleared");
        tracker.error(ImportError::internal("boom"));
        let (logs, errors, warnings) = tracker.finish();
        assert_eq!(logs.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(warnings, vec!["reference left cleared".to_string()]);
    }
}
