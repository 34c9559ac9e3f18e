//! Where changesets come from, and how their content is read back.

use crate::core::error::DocmoveError;
use crate::core::model::{ChangeRecord, Document};

/// A source of changesets, e.g. a migration directory.
pub trait ChangeSource {
    /// Where the changesets are read from, for logs.
    fn describe(&self) -> String;

    /// All changesets, pending, sorted ascending by version.
    ///
    /// Must be deterministic for identical input and fail with
    /// [`DocmoveError::DiscoverySourceError`] when the source is unusable.
    fn discover(&self) -> Result<Vec<ChangeRecord>, DocmoveError>;

    /// Content of a single-file changeset.
    fn read_file(&self, script: &str) -> Result<String, DocmoveError>;

    /// Documents of a documents changeset.
    fn read_documents(&self, script: &str) -> Result<Vec<Document>, DocmoveError>;
}
