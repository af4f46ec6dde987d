//! Import subcommand
//!
//! Reads a bundle (plain or gzipped JSON) and imports it through the
//! executor, with conflict handling chosen from flags and config.

use super::parse_kinds;
use crate::config::Config;
use crate::transfer::{ConflictDefaults, ConflictType, ImportOptions, Resolution};
use anyhow::{Result, anyhow};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the import subcommand
#[derive(Args, Debug, Default)]
pub struct ImportArgs {
    /// Path to the bundle to import
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Validate and plan without modifying the notebook
    ///
    /// Parses the file, detects conflicts, and reports what would be
    /// written without making any changes.
    #[arg(long)]
    pub dry_run: bool,

    /// Give every imported record a fresh identifier
    #[arg(long)]
    pub new_ids: bool,

    /// Skip the pre-import backup
    #[arg(long)]
    pub no_backup: bool,

    /// Resolution for duplicate ids: skip, replace, merge, create-new, ask-user
    #[arg(long, value_name = "RESOLUTION")]
    pub on_duplicate: Option<Resolution>,

    /// Refuse the import when validation finds more errors than this
    #[arg(long, value_name = "N")]
    pub max_errors: Option<usize>,

    /// Require an explicit --resolve for every conflict
    #[arg(long)]
    pub strict: bool,

    /// Comma-separated list of kinds to import
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub kinds: Option<Vec<String>>,

    /// Comma-separated list of record ids to import
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub select: Option<Vec<String>>,

    /// Resolve one conflict: CONFLICT_ID=RESOLUTION (repeatable)
    #[arg(long, value_name = "ID=RESOLUTION")]
    pub resolve: Vec<String>,
}

impl ImportArgs {
    /// Merge flags over the configured import defaults.
    pub fn import_options(&self, config: &Config) -> Result<ImportOptions> {
        let mut options = config.import_options();
        options.dry_run = self.dry_run;
        if self.new_ids {
            options.preserve_ids = false;
        }
        if self.no_backup {
            options.create_backup = false;
        }
        if self.strict {
            options.defaults = ConflictDefaults::strict();
        }
        if let Some(resolution) = self.on_duplicate {
            if !resolution.applies_to(ConflictType::DuplicateId) {
                return Err(anyhow!("{} cannot resolve duplicate ids", resolution));
            }
            options.defaults = options
                .defaults
                .with_default(ConflictType::DuplicateId, resolution);
        }
        if let Some(max) = self.max_errors {
            options.error_threshold = Some(max);
        }
        if let Some(kinds) = &self.kinds {
            options = options.with_kinds(parse_kinds(kinds)?);
        }
        if let Some(ids) = &self.select {
            options = options.with_selection(ids.iter().map(|id| id.trim().to_string()));
        }
        for entry in &self.resolve {
            let (conflict_id, resolution) = entry
                .rsplit_once('=')
                .ok_or_else(|| anyhow!("--resolve expects CONFLICT_ID=RESOLUTION, got '{}'", entry))?;
            let resolution: Resolution = resolution.parse().map_err(|e: String| anyhow!(e))?;
            options = options.with_resolution(conflict_id, resolution);
        }
        Ok(options)
    }

    /// Describe the import mode for logging
    pub fn import_mode(&self) -> &'static str {
        match (self.dry_run, self.new_ids) {
            (true, _) => "dry-run",
            (false, true) => "fresh-ids",
            (false, false) => "preserve-ids",
        }
    }
}
