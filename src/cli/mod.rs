//! CLI command definitions for notebook-transfer
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod export;
pub mod import;

use crate::types::EntityKind;
use clap::{Parser, Subcommand};
use export::ExportArgs;
use import::ImportArgs;
use std::path::PathBuf;

/// Bulk export and import for the productivity notebook
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export the notebook to a JSON bundle
    Export(ExportArgs),

    /// Import a JSON bundle into the notebook
    Import(ImportArgs),
}

/// Parse a comma-separated kind list such as `task,goal`.
pub(crate) fn parse_kinds(values: &[String]) -> anyhow::Result<Vec<EntityKind>> {
    values
        .iter()
        .map(|v| v.parse::<EntityKind>().map_err(|e| anyhow::anyhow!(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_import_command() {
        let cli = Cli::try_parse_from([
            "notebook-transfer",
            "--database",
            "nb.db",
            "import",
            "bundle.json",
            "--dry-run",
            "--kinds",
            "task,goal",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("nb.db")));
        assert_eq!(cli.log, "2");
        let Command::Import(args) = cli.command else {
            panic!("expected import");
        };
        assert!(args.dry_run);
        assert_eq!(args.kinds, Some(vec!["task".to_string(), "goal".to_string()]));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["notebook-transfer", "export", "-o", "out.json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Export(_)));
    }

    #[test]
    fn test_parse_kinds() {
        let kinds = parse_kinds(&["task".into(), " focus_session".into()]).unwrap();
        assert_eq!(kinds, vec![EntityKind::Task, EntityKind::FocusSession]);
        assert!(parse_kinds(&["widget".into()]).is_err());
    }
}
