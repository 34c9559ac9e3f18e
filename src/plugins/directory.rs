//! Changesets read from a migration directory.
//!
//! Entries directly under the directory named `V<version>__<description>[.<ext>]`
//! are changesets; anything else is ignored. A sub-directory holds json
//! documents, a file's extension selects its [`ChangeType`].
//!
//! File content handed to the applier has `${name}` placeholders replaced with
//! the configured variables; unknown placeholders are left as written.
//!
//! Checksums are persisted and compared across runs, so the algorithm here is
//! fixed: a file hashes to the hex SHA-256 of its bytes; a directory hashes to
//! the hex SHA-256 of the concatenated hex digests of its `json`/`n1ql` files,
//! taken in file-name order, or to nothing if it has none.

use crate::core::error::DocmoveError;
use crate::core::model::{ChangeRecord, ChangeType, Document};
use crate::core::source::ChangeSource;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static FILE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^V([\w.]+)__([\w ]+)\.?(\w*)$").unwrap());

static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Extensions hashed inside a documents directory.
const DIRECTORY_CHECKSUM_EXTENSIONS: &[&str] = &["json", "n1ql"];

pub struct DirectorySource {
    root: PathBuf,
    variables: BTreeMap<String, String>,
}

impl DirectorySource {
    /// Fails if `root` is missing or not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DocmoveError> {
        let root = root.into();
        if !root.exists() {
            return Err(DocmoveError::DiscoverySourceError(format!(
                "The change path '{}' doesn't exist",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(DocmoveError::DiscoverySourceError(format!(
                "The change path '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            variables: BTreeMap::new(),
        })
    }

    /// Values substituted for `${name}` placeholders in changeset content.
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, script: &str) -> PathBuf {
        self.root.join(script)
    }

    fn read_content(&self, path: &Path) -> Result<String, DocmoveError> {
        let content = fs::read_to_string(path)?;
        Ok(substitute_variables(&content, &self.variables))
    }
}

impl ChangeSource for DirectorySource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn discover(&self) -> Result<Vec<ChangeRecord>, DocmoveError> {
        info!(path = %self.root.display(), "Fetching change logs from migration folder");
        let entries = fs::read_dir(&self.root).map_err(|e| {
            DocmoveError::DiscoverySourceError(format!(
                "Unable to read change path '{}': {}",
                self.root.display(),
                e
            ))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        paths.sort();

        let mut by_version: BTreeMap<String, ChangeRecord> = BTreeMap::new();
        for path in paths {
            let Some(change) = parse_change(&path)? else {
                continue;
            };
            debug!(change = %change.label(), "Fetched change log");
            if by_version.contains_key(&change.version) {
                warn!(
                    version = %change.version,
                    script = %change.script,
                    "Duplicate change log version, ignoring"
                );
                continue;
            }
            by_version.insert(change.version.clone(), change);
        }

        info!(count = by_version.len(), "Fetched change logs from migration folder");
        Ok(by_version.into_values().collect())
    }

    fn read_file(&self, script: &str) -> Result<String, DocmoveError> {
        self.read_content(&self.resolve(script))
    }

    fn read_documents(&self, script: &str) -> Result<Vec<Document>, DocmoveError> {
        let dir = self.resolve(script);
        let mut documents = Vec::new();
        for path in sorted_files(&dir)? {
            if extension_of(&path).as_deref() != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            documents.push(Document {
                key,
                content: self.read_content(&path)?,
            });
        }
        Ok(documents)
    }
}

/// Builds the pending change record for `path`, or `None` if its name is not a
/// changeset name.
fn parse_change(path: &Path) -> Result<Option<ChangeRecord>, DocmoveError> {
    let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return Ok(None);
    };
    let Some(captures) = FILE_NAME_PATTERN.captures(&file_name) else {
        return Ok(None);
    };
    let version = captures[1].to_string();
    let description = captures[2].replace('_', " ");
    let change_type = change_type_of(path)?;
    let checksum = calculate_checksum(path)?;

    Ok(Some(ChangeRecord::discovered(
        version,
        description,
        change_type,
        file_name,
        checksum,
    )))
}

pub fn change_type_of(path: &Path) -> Result<ChangeType, DocmoveError> {
    if path.is_dir() {
        return Ok(ChangeType::Documents);
    }
    extension_of(path)
        .as_deref()
        .and_then(ChangeType::from_extension)
        .ok_or_else(|| {
            DocmoveError::DiscoverySourceError(format!(
                "Unknown change log type: {}",
                path.display()
            ))
        })
}

/// Checksum of a changeset file or documents directory.
pub fn calculate_checksum(path: &Path) -> Result<Option<String>, DocmoveError> {
    if !path.exists() {
        return Err(DocmoveError::DiscoverySourceError(format!(
            "File doesn't exist: {}",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Ok(Some(sha256_hex(&fs::read(path)?)));
    }

    let mut concatenated = String::new();
    let mut any = false;
    for file in sorted_files(path)? {
        let matches = extension_of(&file)
            .is_some_and(|ext| DIRECTORY_CHECKSUM_EXTENSIONS.contains(&ext.as_str()));
        if matches {
            concatenated.push_str(&sha256_hex(&fs::read(&file)?));
            any = true;
        }
    }
    Ok(any.then(|| sha256_hex(concatenated.as_bytes())))
}

/// Replaces `${name}` with the value of `name`; unknown names stay untouched.
pub fn substitute_variables(content: &str, variables: &BTreeMap<String, String>) -> String {
    if variables.is_empty() {
        return content.to_string();
    }
    VARIABLE_PATTERN
        .replace_all(content, |caps: &regex::Captures<'_>| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Regular files directly inside `dir`, sorted by file name.
fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, DocmoveError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
