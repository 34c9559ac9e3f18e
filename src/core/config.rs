//! Migration settings from `docmove.toml`, overridable from the command line.

use crate::core::error::DocmoveError;
use crate::core::migration::MigrateOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "docmove.toml";
pub const DEFAULT_MIGRATION_PATH: &str = "db/migration";
pub const DEFAULT_STORE_PATH: &str = "docmove.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrateConfig {
    /// SQLite document store to migrate.
    pub store: PathBuf,
    /// Directory holding the changesets.
    pub source: PathBuf,
    pub scope: Option<String>,
    pub collection: Option<String>,
    /// Runner name recorded on records; the OS user when unset.
    pub runner: Option<String>,
    pub build_deferred_indexes: bool,
    pub wait_for_indexes_secs: Option<u64>,
    /// Values for `${name}` placeholders in changeset content.
    pub variables: BTreeMap<String, String>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from(DEFAULT_STORE_PATH),
            source: PathBuf::from(DEFAULT_MIGRATION_PATH),
            scope: None,
            collection: None,
            runner: None,
            build_deferred_indexes: false,
            wait_for_indexes_secs: None,
            variables: BTreeMap::new(),
        }
    }
}

impl MigrateConfig {
    /// Loads `path`, or `docmove.toml` under `dir` when no path is given.
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>, dir: &Path) -> Result<Self, DocmoveError> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (dir.join(CONFIG_FILE_NAME), false),
        };

        if !config_path.exists() {
            if explicit {
                return Err(DocmoveError::ConfigError(format!(
                    "config file '{}' not found",
                    config_path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(DocmoveError::IoError)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, DocmoveError> {
        toml::from_str(content).map_err(|e| DocmoveError::ConfigError(e.to_string()))
    }

    pub fn options(&self) -> MigrateOptions {
        MigrateOptions {
            build_deferred_indexes: self.build_deferred_indexes,
            scope: self.scope.clone(),
            collection: self.collection.clone(),
            wait_for_indexes: self.wait_for_indexes_secs.map(Duration::from_secs),
        }
    }
}
