//! CLI struct definitions for the docmove command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "docmove",
    version = env!("CARGO_PKG_VERSION"),
    about = "Applies versioned changesets to a document store exactly once."
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./docmove.toml when present).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// More logging: `-v` for debug, `-vv` for trace (overridden by DOCMOVE_LOG).
    #[clap(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Apply pending changesets under the store lock.
    Migrate(MigrateCli),
    /// List the change records persisted in the store.
    Status(StatusCli),
    /// Inspect or recover the store lock.
    Lock(LockCli),
    /// Print the version.
    Version,
}

#[derive(clap::Args, Debug, Default)]
pub(crate) struct StoreArgs {
    /// SQLite document store path.
    #[clap(long)]
    pub store: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct MigrateCli {
    #[clap(flatten)]
    pub store: StoreArgs,
    /// Directory holding the changesets.
    #[clap(long, short = 'c')]
    pub source: Option<PathBuf>,
    /// Scope documents are imported into.
    #[clap(long, short = 'S')]
    pub scope: Option<String>,
    /// Collection documents are imported into.
    #[clap(long, short = 'C')]
    pub collection: Option<String>,
    /// Runner name recorded on records (defaults to the OS user).
    #[clap(long)]
    pub runner: Option<String>,
    /// Build deferred indexes after migrating, optionally under SCOPE[.COLLECTION]
    /// instead of the migration's scope and collection.
    #[clap(
        long,
        value_name = "SCOPE[.COLLECTION]",
        num_args = 0..=1,
        default_missing_value = ""
    )]
    pub build_indexes: Option<String>,
    /// Custom variables substituted for `${key}`, e.g. `-V key1=value1,key2=value2`.
    #[clap(long = "variable", short = 'V', value_delimiter = ',', value_parser = parse_variable)]
    pub variables: Vec<(String, String)>,
    /// Wait up to SECS for indexes to come online after migrating.
    #[clap(long, value_name = "SECS")]
    pub wait_indexes: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct StatusCli {
    #[clap(flatten)]
    pub store: StoreArgs,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct LockCli {
    #[clap(flatten)]
    pub store: StoreArgs,
    #[clap(subcommand)]
    pub command: LockCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum LockCommand {
    /// Show who holds the lock.
    Status,
    /// Delete the lock regardless of holder.
    Release {
        /// Required: confirms releasing a lock another process may hold.
        #[clap(long)]
        force: bool,
    },
}

/// Parses one `key=value` variable.
fn parse_variable(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("invalid variable '{}', expected key=value", raw)),
    }
}

/// Splits an index build target `scope[.collection]`.
pub(crate) fn parse_index_target(raw: &str) -> (Option<String>, Option<String>) {
    let mut parts = raw.splitn(2, '.').map(str::trim).filter(|p| !p.is_empty());
    let scope = parts.next().map(str::to_string);
    let collection = parts.next().map(str::to_string);
    (scope, collection)
}
