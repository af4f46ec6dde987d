//! notebook-transfer
//!
//! Command-line front end for bulk export and import of a productivity
//! notebook stored in SQLite.

use anyhow::{Result, bail};
use clap::Parser;
use notebook_transfer::cli::export::ExportArgs;
use notebook_transfer::cli::import::ImportArgs;
use notebook_transfer::cli::{Cli, Command};
use notebook_transfer::config::{Config, ConfigLoader};
use notebook_transfer::db::Database;
use notebook_transfer::export::{export_from_stores, read_bundle_value};
use notebook_transfer::logging::{LogTarget, init_tracing};
use notebook_transfer::transfer::{
    FileBackupSink, ImportExecutor, ImportPhase, ImportProgress, ImportResult, WriteAction,
};
use notebook_transfer::types::EntityKind;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&LogTarget::parse(&cli.log), cli.verbose)?;

    let mut loader = match &cli.config {
        Some(path) => ConfigLoader::load_file(path)?,
        None => ConfigLoader::load()?,
    };
    for (tier, path) in loader.sources() {
        debug!(tier = %tier, path = %path.display(), "Using config file");
    }

    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.store.db_path = db_path.clone();
    }

    match cli.command {
        Command::Export(args) => run_export(config, args).await,
        Command::Import(args) => run_import(config, args).await,
    }
}

fn open_database(config: &Config) -> Result<Database> {
    config.ensure_db_dir()?;
    let db = Database::open(config.db_path())?;
    info!(path = %config.db_path().display(), "Opened notebook database");
    Ok(db)
}

/// Run the export command
async fn run_export(config: &Config, args: ExportArgs) -> Result<()> {
    let db = open_database(config)?;
    let options = args.filter_options(&config.export)?;
    let user_id = args.user.as_deref().unwrap_or(&config.owner.user_id);

    let bundle = export_from_stores(&db.stores(), &options, user_id).await?;
    let gzip = args.should_compress(&config.export);
    let total = bundle.metadata().total_items;

    if let Some(path) = &args.output {
        bundle.write_to(path, gzip)?;
        eprintln!(
            "Exported {} items to {}{}",
            total,
            path.display(),
            if gzip { " (gzipped)" } else { "" }
        );
    } else {
        bundle.write_json(std::io::stdout().lock(), gzip)?;
    }
    Ok(())
}

/// Run the import command
async fn run_import(config: &Config, args: ImportArgs) -> Result<()> {
    let bundle = read_bundle_value(&args.file)?;
    let options = args.import_options(config)?;
    let db = open_database(config)?;

    info!(
        file = %args.file.display(),
        mode = args.import_mode(),
        "Starting import"
    );

    let mut executor = ImportExecutor::new(db.stores())
        .with_id_generator(config.id_generator())
        .with_backup_sink(Arc::new(FileBackupSink::new(config.backup_dir())))
        .with_progress(Arc::new(|progress: &ImportProgress| {
            debug!(
                phase = %progress.phase,
                processed = progress.items_processed,
                total = progress.items_total,
                percent = progress.overall_progress,
                eta_ms = progress.estimated_remaining.map(|d| d.as_millis() as u64),
                "Import progress"
            );
        }));

    let cancel = executor.cancellation_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling import after the current record");
            cancel.cancel();
        }
    });

    let result = executor.run(&bundle, &options).await;
    print_report(&result);

    match result.phase {
        ImportPhase::Failed => bail!("import failed"),
        ImportPhase::Cancelled => bail!(
            "import cancelled after {} of {} records",
            result.items_processed,
            result.items_total
        ),
        _ => Ok(()),
    }
}

fn print_report(result: &ImportResult) {
    if result.dry_run {
        println!("Dry run results:");
    } else if result.success {
        println!("Import complete:");
    } else {
        println!("Import finished with problems:");
    }
    println!("  Phase: {}", result.phase);
    println!(
        "  Processed: {} of {} in {:.2}s",
        result.items_processed,
        result.items_total,
        result.duration.as_secs_f64()
    );
    if let Some(backup) = &result.backup_id {
        println!("  Backup: {}", backup);
    }

    if result.dry_run {
        println!("  Would write:");
        for kind in EntityKind::ALL {
            let planned: Vec<_> = result.plan.iter().filter(|p| p.kind == kind).collect();
            if planned.is_empty() {
                continue;
            }
            let count = |action: WriteAction| planned.iter().filter(|p| p.action == action).count();
            println!(
                "    {}: {} add, {} replace, {} merge, {} skip",
                kind.collection_key(),
                count(WriteAction::Add),
                count(WriteAction::Replace),
                count(WriteAction::Merge),
                count(WriteAction::Skip)
            );
        }
    } else if !result.per_kind.is_empty() {
        println!("  Records:");
        for (kind, counts) in &result.per_kind {
            println!(
                "    {}: {} imported, {} skipped, {} failed",
                kind.collection_key(),
                counts.imported,
                counts.skipped,
                counts.failed
            );
        }
    }

    if !result.conflicts.is_empty() {
        println!("  Conflicts:");
        for conflict in result.conflicts.conflicts() {
            let resolution = result
                .conflicts
                .final_resolution(conflict)
                .map_or("unresolved", |r| r.as_str());
            println!("    {} -> {}", conflict.id, resolution);
        }
    }

    if !result.id_mapping.is_empty() {
        println!("  ID mapping ({} records):", result.id_mapping.len());
        let mut entries: Vec<_> = result.id_mapping.iter().collect();
        entries.sort();
        for (original, written) in entries {
            println!("    {} -> {}", original, written);
        }
    }

    if !result.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &result.warnings {
            println!("    - {}", warning);
        }
    }
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}
