//! Persisted entities: change records, the lock record, and their enums.
//!
//! Field names and enum spellings are part of the on-store format; records
//! written by earlier runs must keep deserializing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key prefix of every change record; the full key is `changelog::<version>`.
pub const CHANGELOG_PREFIX: &str = "changelog::";

/// Well-known key of the singleton lock record.
pub const LOCK_KEY: &str = "DATABASE_CHANGELOG_LOCK";

/// Derives the store key of the change record for `version`.
pub fn change_key(version: &str) -> String {
    format!("{}{}", CHANGELOG_PREFIX, version)
}

/// Opaque revision stamp returned by the store on every read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CasToken(pub u64);

impl fmt::Display for CasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of content a changeset carries, which decides how it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// A folder of json documents, bulk upserted.
    #[serde(rename = "DOCUMENTS")]
    Documents,
    /// A json design document.
    #[serde(rename = "DESIGN_DOC")]
    DesignDoc,
    /// A file of `;`-separated query statements.
    #[serde(rename = "N1QL")]
    Query,
    /// A json full text search index definition.
    #[serde(rename = "FTS")]
    SearchIndex,
    /// A json eventing function definition.
    #[serde(rename = "EVENTING")]
    Eventing,
}

impl ChangeType {
    /// File extension of single-file changesets; documents are folders.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            ChangeType::Documents => None,
            ChangeType::DesignDoc => Some("json"),
            ChangeType::Query => Some("n1ql"),
            ChangeType::SearchIndex => Some("fts"),
            ChangeType::Eventing => Some("eventing"),
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        [
            ChangeType::DesignDoc,
            ChangeType::Query,
            ChangeType::SearchIndex,
            ChangeType::Eventing,
        ]
        .into_iter()
        .find(|t| t.extension() == Some(extension))
    }

    pub fn label(self) -> &'static str {
        match self {
            ChangeType::Documents => "documents",
            ChangeType::DesignDoc => "design document",
            ChangeType::Query => "query script",
            ChangeType::SearchIndex => "search index",
            ChangeType::Eventing => "eventing function",
        }
    }
}

/// Outcome of the last application attempt. Pending records carry no status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Executed,
    Failed,
    Skipped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Executed => "EXECUTED",
            Status::Failed => "FAILED",
            Status::Skipped => "SKIPPED",
        }
    }
}

/// Execution state of one changeset, persisted under [`change_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u64>,
    pub description: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Path of the script file or folder, relative to the change source.
    pub script: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    /// Epoch milliseconds of the last application attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Milliseconds spent applying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// `None` until read from or written to the store; cleared to force a re-save.
    #[serde(skip)]
    pub cas: Option<CasToken>,
}

impl ChangeRecord {
    /// A freshly discovered, pending changeset.
    pub fn discovered(
        version: impl Into<String>,
        description: impl Into<String>,
        change_type: ChangeType,
        script: impl Into<String>,
        checksum: Option<String>,
    ) -> Self {
        Self {
            version: version.into(),
            order: None,
            description: description.into(),
            change_type,
            script: script.into(),
            checksum,
            runner: None,
            timestamp: None,
            duration: None,
            status: None,
            cas: None,
        }
    }

    pub fn key(&self) -> String {
        change_key(&self.version)
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_none()
    }

    /// `version::description`, the form used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}::{}", self.version, self.description)
    }
}

/// The singleton pessimistic lock stored under [`LOCK_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub locked: bool,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub runner: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(skip)]
    pub cas: Option<CasToken>,
}

/// One json document of a documents changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Store key, taken from the file stem.
    pub key: String,
    pub content: String,
}
