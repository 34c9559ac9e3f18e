//! docmove: versioned changesets for document stores.
//!
//! docmove applies an ordered set of changesets (query scripts, json
//! documents, design documents, search index and eventing definitions) to a
//! document store exactly once each. Execution state is kept in the same
//! store as one change record per changeset, so:
//!
//! - re-running a migration is a no-op once everything is applied
//! - a failed changeset can be fixed and retried on the next run
//! - editing an already-applied changeset is detected and refused
//! - concurrent runners are serialized by a lock document in the store
//!
//! # Changesets
//!
//! A migration directory holds entries named `V<version>__<description>[.<ext>]`:
//!
//! | Entry | Applied as |
//! |---|---|
//! | directory | bulk upsert of its `.json` documents |
//! | `.n1ql` | `;`-separated query statements |
//! | `.json` | design document |
//! | `.fts` | full text search index definition |
//! | `.eventing` | eventing function definition |
//!
//! Versions are ordered as plain strings, so `V10` sorts before `V2`.
//!
//! # Examples
//!
//! ```bash
//! # Apply everything pending in ./db/migration to ./docmove.db
//! docmove migrate
//!
//! # Show the change log
//! docmove status --format json
//!
//! # Recover from a runner that died holding the lock
//! docmove lock release --force
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: change log model, lock, reconciliation, apply loop, orchestration
//! - [`plugins`]: SQLite and in-memory stores, directory source, query splitting

mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{Cli, Command, LockCommand, MigrateCli, StatusCli, StoreArgs};
use crate::core::config::MigrateConfig;
use crate::core::error::DocmoveError;
use crate::core::identity::{FixedIdentity, IdentityProvider, OsUserIdentity};
use crate::core::lock::LockCoordinator;
use crate::core::migration::Migrator;
use crate::core::model::{CHANGELOG_PREFIX, ChangeRecord, Status};
use crate::core::store::Repository;
use crate::core::time;
use crate::plugins::directory::DirectorySource;
use crate::plugins::sqlite_store::SqliteStore;

use clap::Parser;
use colored::Colorize;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Log filter environment variable, e.g. `DOCMOVE_LOG=docmove=debug`.
pub const LOG_ENV: &str = "DOCMOVE_LOG";

pub fn run() -> Result<(), DocmoveError> {
    let cli = Cli::parse();
    if let Command::Version = cli.command {
        println!("v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    init_tracing(cli.verbose);

    let current_dir = std::env::current_dir()?;
    let config = MigrateConfig::load(cli.config.as_deref(), &current_dir)?;

    match cli.command {
        Command::Version => Ok(()),
        Command::Migrate(migrate_cli) => run_migrate(config, migrate_cli),
        Command::Status(status_cli) => run_status(&config, status_cli),
        Command::Lock(lock_cli) => {
            let store = open_store(&config, &lock_cli.store)?;
            let identity = identity_for(&config);
            let mut lock = LockCoordinator::new(&store, identity.as_ref());
            match lock_cli.command {
                LockCommand::Status => {
                    match lock.current()? {
                        Some(record) if record.locked => println!(
                            "{} locked by {} since {}",
                            "●".bright_yellow(),
                            record.runner.as_deref().unwrap_or("unknown").bright_white(),
                            record.timestamp.map(|t| t.to_string()).unwrap_or_default()
                        ),
                        _ => println!("{} unlocked", "○".bright_green()),
                    }
                    Ok(())
                }
                LockCommand::Release { force } => {
                    if !force {
                        return Err(DocmoveError::ValidationError(
                            "releasing a lock held by another process requires --force".into(),
                        ));
                    }
                    lock.force_release_lock()?;
                    println!("{} lock released", "✓".bright_green());
                    Ok(())
                }
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn identity_for(config: &MigrateConfig) -> Box<dyn IdentityProvider> {
    match &config.runner {
        Some(runner) => Box::new(FixedIdentity(runner.clone())),
        None => Box::new(OsUserIdentity),
    }
}

fn open_store(config: &MigrateConfig, args: &StoreArgs) -> Result<SqliteStore, DocmoveError> {
    let path = args.store.as_deref().unwrap_or(config.store.as_path());
    SqliteStore::open(path)
}

fn run_migrate(mut config: MigrateConfig, args: MigrateCli) -> Result<(), DocmoveError> {
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(store) = args.store.store.clone() {
        config.store = store;
    }
    if args.scope.is_some() {
        config.scope = args.scope;
    }
    if args.collection.is_some() {
        config.collection = args.collection;
    }
    if args.runner.is_some() {
        config.runner = args.runner;
    }
    if args.build_indexes.is_some() {
        config.build_deferred_indexes = true;
    }
    if args.wait_indexes.is_some() {
        config.wait_for_indexes_secs = args.wait_indexes;
    }
    config.variables.extend(args.variables);

    let mut options = config.options();
    if let Some(target) = args.build_indexes.as_deref().filter(|t| !t.is_empty()) {
        let (scope, collection) = cli::parse_index_target(target);
        options.scope = scope;
        options.collection = collection;
    }

    let source = DirectorySource::open(&config.source)?.with_variables(config.variables.clone());
    let store = SqliteStore::open(&config.store)?
        .with_collection(config.scope.clone(), config.collection.clone());
    let identity = identity_for(&config);

    let report = Migrator::new(&store, &source, &store, identity.as_ref())
        .with_options(options)
        .migrate()?;

    println!(
        "{} {} discovered, {} applied, {} skipped, {} updated in {}",
        "✓".bright_green(),
        report.discovered,
        report.applied.to_string().bright_green(),
        report.skipped.to_string().bright_yellow(),
        report.resaved,
        time::pretty_duration(std::time::Duration::from_millis(report.duration_ms))
    );
    Ok(())
}

fn run_status(config: &MigrateConfig, args: StatusCli) -> Result<(), DocmoveError> {
    let store = open_store(config, &args.store)?;
    let records = Repository::<ChangeRecord>::new(&store).find_by_prefix(CHANGELOG_PREFIX)?;

    match args.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        "text" => print_records(store.path(), &records),
        other => {
            return Err(DocmoveError::ValidationError(format!(
                "unknown format '{}', expected 'text' or 'json'",
                other
            )));
        }
    }
    Ok(())
}

fn print_records(store_path: &Path, records: &[ChangeRecord]) {
    println!(
        "{} {} change record(s) in {}",
        "▸".bright_cyan(),
        records.len(),
        store_path.display()
    );
    for record in records {
        let status = match record.status {
            Some(Status::Executed) => Status::Executed.as_str().bright_green(),
            Some(Status::Failed) => Status::Failed.as_str().bright_red(),
            Some(Status::Skipped) => Status::Skipped.as_str().bright_yellow(),
            None => "PENDING".normal(),
        };
        let order = record
            .order
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>4}  {:<12} {:<9} {}",
            order,
            record.version,
            status,
            record.description
        );
    }
}
