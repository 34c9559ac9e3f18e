//! Merges discovered changesets with the change records already in the store.

use crate::core::error::DocmoveError;
use crate::core::model::{ChangeRecord, Status};
use crate::core::store::{DocumentStore, Repository};
use tracing::{debug, error, info, warn};

pub struct Reconciler<'a> {
    repository: Repository<'a, ChangeRecord>,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            repository: Repository::new(store),
        }
    }

    /// Returns, for each discovered changeset, either the changeset itself (never
    /// seen before) or its stored record updated with what was discovered.
    ///
    /// Fails with [`DocmoveError::ChecksumIntegrityError`] as soon as a record that
    /// is not `Failed` shows a different checksum. Nothing is written here.
    pub fn reconcile(
        &self,
        discovered: Vec<ChangeRecord>,
    ) -> Result<Vec<ChangeRecord>, DocmoveError> {
        info!(store = %self.repository.store_name(), "Reading change records from store");
        let mut result = Vec::with_capacity(discovered.len());

        for change in discovered {
            let Some(mut stored) = self.repository.find_one(&change.key())? else {
                debug!(version = %change.version, "Change record not found");
                result.push(change);
                continue;
            };

            match stored.checksum.clone() {
                None => {
                    warn!(version = %change.version, "Change record checksum reset");
                    stored.checksum = change.checksum.clone();
                    stored.cas = None;
                }
                Some(checksum) if Some(&checksum) != change.checksum.as_ref() => {
                    if stored.status != Some(Status::Failed) {
                        error!(
                            version = %change.version,
                            script = %change.script,
                            "Change record checksum doesn't match, script content was modified"
                        );
                        return Err(DocmoveError::ChecksumIntegrityError {
                            version: change.version,
                            script: change.script,
                        });
                    }
                    info!(version = %change.version, "Failed change record modified, will retry");
                    stored.status = None;
                    stored.checksum = change.checksum.clone();
                }
                Some(_) => {}
            }

            if stored.description != change.description || stored.script != change.script {
                warn!(
                    version = %change.version,
                    description = %change.description,
                    "Change record description updated"
                );
                debug!(stored = ?stored, discovered = ?change, "Description drift");
                stored.description = change.description;
                stored.script = change.script;
                stored.cas = None;
            }
            result.push(stored);
        }

        result.sort_by(|a, b| a.version.cmp(&b.version));
        info!(count = result.len(), "Reconciled change records");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ChangeType;
    use crate::plugins::memory_store::MemoryStore;

    fn discovered(version: &str, checksum: Option<&str>) -> ChangeRecord {
        ChangeRecord::discovered(
            version,
            format!("change {}", version),
            ChangeType::Query,
            format!("V{}__change_{}.n1ql", version, version),
            checksum.map(str::to_string),
        )
    }

    fn persist(store: &MemoryStore, mut record: ChangeRecord) -> ChangeRecord {
        let repo: Repository<ChangeRecord> = Repository::new(store);
        repo.save(&record.key(), &mut record).unwrap();
        record
    }

    #[test]
    fn test_unknown_change_passes_through() {
        let store = MemoryStore::new();
        let out = Reconciler::new(&store)
            .reconcile(vec![discovered("1", Some("a"))])
            .unwrap();
        assert_eq!(out, vec![discovered("1", Some("a"))]);
    }

    #[test]
    fn test_matching_record_keeps_state_and_token() {
        let store = MemoryStore::new();
        let mut executed = discovered("1", Some("a"));
        executed.status = Some(Status::Executed);
        executed.order = Some(4);
        let saved = persist(&store, executed);

        let out = Reconciler::new(&store)
            .reconcile(vec![discovered("1", Some("a"))])
            .unwrap();
        assert_eq!(out[0].order, Some(4));
        assert_eq!(out[0].status, Some(Status::Executed));
        assert_eq!(out[0].cas, saved.cas);
    }

    #[test]
    fn test_reset_checksum_is_adopted_and_forces_resave() {
        let store = MemoryStore::new();
        let mut executed = discovered("1", None);
        executed.status = Some(Status::Executed);
        persist(&store, executed);

        let out = Reconciler::new(&store)
            .reconcile(vec![discovered("1", Some("b"))])
            .unwrap();
        assert_eq!(out[0].checksum.as_deref(), Some("b"));
        assert_eq!(out[0].status, Some(Status::Executed));
        assert!(out[0].cas.is_none());
    }

    #[test]
    fn test_modified_executed_script_is_fatal() {
        let store = MemoryStore::new();
        let mut executed = discovered("1", Some("a"));
        executed.status = Some(Status::Executed);
        persist(&store, executed);

        let err = Reconciler::new(&store)
            .reconcile(vec![discovered("1", Some("b"))])
            .unwrap_err();
        assert!(
            matches!(err, DocmoveError::ChecksumIntegrityError { version, .. } if version == "1")
        );
    }

    #[test]
    fn test_modified_skipped_script_is_fatal() {
        let store = MemoryStore::new();
        let mut skipped = discovered("1", Some("a"));
        skipped.status = Some(Status::Skipped);
        persist(&store, skipped);

        assert!(
            Reconciler::new(&store)
                .reconcile(vec![discovered("1", Some("b"))])
                .is_err()
        );
    }

    #[test]
    fn test_modified_failed_script_becomes_pending() {
        let store = MemoryStore::new();
        let mut failed = discovered("1", Some("a"));
        failed.status = Some(Status::Failed);
        persist(&store, failed);

        let out = Reconciler::new(&store)
            .reconcile(vec![discovered("1", Some("b"))])
            .unwrap();
        assert!(out[0].is_pending());
        assert_eq!(out[0].checksum.as_deref(), Some("b"));
    }

    #[test]
    fn test_description_change_is_cosmetic() {
        let store = MemoryStore::new();
        let mut executed = discovered("1", Some("a"));
        executed.status = Some(Status::Executed);
        executed.order = Some(1);
        persist(&store, executed);

        let mut renamed = discovered("1", Some("a"));
        renamed.description = "better name".to_string();
        renamed.script = "V1__better_name.n1ql".to_string();

        let out = Reconciler::new(&store).reconcile(vec![renamed]).unwrap();
        assert_eq!(out[0].description, "better name");
        assert_eq!(out[0].script, "V1__better_name.n1ql");
        assert_eq!(out[0].order, Some(1));
        assert_eq!(out[0].status, Some(Status::Executed));
        assert!(out[0].cas.is_none());
    }
}
