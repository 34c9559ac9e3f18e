//! Sequential apply loop over reconciled change records.
//!
//! Records are visited in ascending version order. Executed and Skipped records
//! are final; a pending record whose version does not sort after the last
//! executed one is marked Skipped and never applied. Everything else is applied
//! one at a time, and the first failure halts the batch. Every state change is
//! persisted before moving on, so an interrupted run resumes where it stopped.

use crate::core::error::DocmoveError;
use crate::core::identity::IdentityProvider;
use crate::core::model::{CHANGELOG_PREFIX, ChangeRecord, ChangeType, Document, Status};
use crate::core::source::ChangeSource;
use crate::core::store::{DocumentStore, Repository};
use crate::core::time;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Applies changeset content to the target store, one method per change type.
pub trait ContentApplier {
    fn apply_documents(&self, documents: &[Document]) -> Result<(), DocmoveError>;
    fn apply_query(&self, content: &str) -> Result<(), DocmoveError>;
    fn apply_design_doc(&self, name: &str, content: &str) -> Result<(), DocmoveError>;
    fn apply_fts_index(&self, name: &str, content: &str) -> Result<(), DocmoveError>;
    fn apply_eventing_function(&self, name: &str, content: &str) -> Result<(), DocmoveError>;

    /// Triggers the build of indexes created as deferred.
    fn build_deferred_indexes(
        &self,
        _scope: Option<&str>,
        _collection: Option<&str>,
    ) -> Result<(), DocmoveError> {
        Ok(())
    }

    /// Blocks until indexes are online or `timeout` elapses.
    fn wait_for_indexes(&self, _timeout: Duration) -> Result<(), DocmoveError> {
        Ok(())
    }
}

/// What happened to one pending record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub applied: usize,
    pub skipped: usize,
    /// Executed records re-saved after a cosmetic update.
    pub resaved: usize,
}

/// Version and order of the most recently applied changeset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LastExecuted {
    version: String,
    order: u64,
}

impl LastExecuted {
    /// The Executed record with the greatest version. The next order continues
    /// from the highest order seen so that orders are never reused.
    fn from_records<'r>(records: impl IntoIterator<Item = &'r ChangeRecord>) -> Self {
        let mut last = Self::default();
        for record in records {
            if record.status != Some(Status::Executed) {
                continue;
            }
            if record.version > last.version {
                last.version = record.version.clone();
            }
            if let Some(order) = record.order {
                last.order = last.order.max(order);
            }
        }
        last
    }
}

pub struct Executor<'a> {
    repository: Repository<'a, ChangeRecord>,
    source: &'a dyn ChangeSource,
    applier: &'a dyn ContentApplier,
    identity: &'a dyn IdentityProvider,
}

impl<'a> Executor<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        source: &'a dyn ChangeSource,
        applier: &'a dyn ContentApplier,
        identity: &'a dyn IdentityProvider,
    ) -> Self {
        Self {
            repository: Repository::new(store),
            source,
            applier,
            identity,
        }
    }

    /// Runs the apply loop. Returns [`DocmoveError::ExecutionError`] for the first
    /// changeset that fails, after persisting it as Failed; changesets applied
    /// earlier in the run stay applied.
    pub fn execute(&self, records: Vec<ChangeRecord>) -> Result<ExecutionSummary, DocmoveError> {
        info!("Applying change logs");
        let mut summary = ExecutionSummary::default();
        // Records whose changeset left the source still hold their version and order.
        let persisted = self.repository.find_by_prefix(CHANGELOG_PREFIX)?;
        let mut last = LastExecuted::from_records(persisted.iter().chain(records.iter()));

        for mut record in records {
            match record.status {
                Some(Status::Executed) => {
                    if record.cas.is_none() {
                        info!(change = %record.label(), "Updating change log");
                        self.persist(&mut record)?;
                        summary.resaved += 1;
                    }
                    continue;
                }
                Some(Status::Skipped) => continue,
                Some(Status::Failed) | None => {}
            }

            match self.run_pending(&mut record, &last)? {
                ApplyOutcome::Applied => {
                    last = LastExecuted {
                        version: record.version.clone(),
                        order: record.order.unwrap_or(last.order + 1),
                    };
                    summary.applied += 1;
                }
                ApplyOutcome::Skipped => summary.skipped += 1,
                ApplyOutcome::Failed(reason) => {
                    return Err(DocmoveError::ExecutionError {
                        version: record.version,
                        description: record.description,
                        reason,
                    });
                }
            }
        }

        if summary.applied == 0 {
            info!("No new change logs found");
        } else {
            info!(count = summary.applied, "Applied change logs");
        }
        Ok(summary)
    }

    fn run_pending(
        &self,
        record: &mut ChangeRecord,
        last: &LastExecuted,
    ) -> Result<ApplyOutcome, DocmoveError> {
        if record.version <= last.version {
            warn!(
                change = %record.label(),
                last_version = %last.version,
                "Change log version is not newer than the last executed one, skipping"
            );
            record.status = Some(Status::Skipped);
            self.persist(record)?;
            return Ok(ApplyOutcome::Skipped);
        }
        self.apply(record, last.order + 1)
    }

    /// Applies one changeset and persists the outcome. Collaborator failures
    /// become [`ApplyOutcome::Failed`]; store failures are returned as errors.
    fn apply(&self, record: &mut ChangeRecord, order: u64) -> Result<ApplyOutcome, DocmoveError> {
        info!(change = %record.label(), "Applying change log");
        let started = Instant::now();
        record.timestamp = Some(time::now_epoch_millis());
        record.runner = Some(self.identity.runner());

        let outcome = match self.dispatch(record) {
            Ok(()) => {
                info!(
                    change = %record.label(),
                    elapsed = %time::pretty_duration(started.elapsed()),
                    "Change log ran successfully"
                );
                record.order = Some(order);
                record.status = Some(Status::Executed);
                ApplyOutcome::Applied
            }
            Err(e) => {
                record.status = Some(Status::Failed);
                ApplyOutcome::Failed(format!(
                    "unable to import {} '{}': {}",
                    record.change_type.label(),
                    record.script,
                    e
                ))
            }
        };

        record.duration = Some(started.elapsed().as_millis() as u64);
        self.persist(record)?;
        Ok(outcome)
    }

    fn dispatch(&self, record: &ChangeRecord) -> Result<(), DocmoveError> {
        let name = record.description.replace(' ', "_");
        match record.change_type {
            ChangeType::Documents => {
                let documents = self.source.read_documents(&record.script)?;
                self.applier.apply_documents(&documents)
            }
            ChangeType::Query => {
                let content = self.source.read_file(&record.script)?;
                self.applier.apply_query(&content)
            }
            ChangeType::DesignDoc => {
                let content = self.source.read_file(&record.script)?;
                self.applier.apply_design_doc(&name, &content)
            }
            ChangeType::SearchIndex => {
                let content = self.source.read_file(&record.script)?;
                self.applier.apply_fts_index(&name, &content)
            }
            ChangeType::Eventing => {
                let content = self.source.read_file(&record.script)?;
                self.applier.apply_eventing_function(&name, &content)
            }
        }
    }

    fn persist(&self, record: &mut ChangeRecord) -> Result<(), DocmoveError> {
        let key = record.key();
        self.repository.save(&key, record)
    }
}
