//! Migration orchestration.
//!
//! `Migrator::migrate` runs one whole migration under the store lock:
//!
//! 1. acquire the lock, or fail without touching anything
//! 2. discover changesets; stop early if there are none
//! 3. reconcile them with stored change records
//! 4. apply what is pending
//! 5. run the configured post-migration index hooks
//!
//! The lock is released on every path out of steps 2 to 5, and any error from
//! those steps is returned only after the release.

use crate::core::error::DocmoveError;
use crate::core::executor::{ContentApplier, ExecutionSummary, Executor};
use crate::core::identity::IdentityProvider;
use crate::core::lock::LockCoordinator;
use crate::core::reconcile::Reconciler;
use crate::core::source::ChangeSource;
use crate::core::store::DocumentStore;
use crate::core::time;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Post-migration behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    pub build_deferred_indexes: bool,
    pub scope: Option<String>,
    pub collection: Option<String>,
    pub wait_for_indexes: Option<Duration>,
}

/// Counts from one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub discovered: usize,
    pub applied: usize,
    pub skipped: usize,
    pub resaved: usize,
    pub duration_ms: u64,
}

pub struct Migrator<'a> {
    store: &'a dyn DocumentStore,
    source: &'a dyn ChangeSource,
    applier: &'a dyn ContentApplier,
    identity: &'a dyn IdentityProvider,
    options: MigrateOptions,
}

impl<'a> Migrator<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        source: &'a dyn ChangeSource,
        applier: &'a dyn ContentApplier,
        identity: &'a dyn IdentityProvider,
    ) -> Self {
        Self {
            store,
            source,
            applier,
            identity,
            options: MigrateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MigrateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn migrate(&self) -> Result<MigrationReport, DocmoveError> {
        info!(store = %self.store.name(), "Begin store update");
        let started = Instant::now();

        let mut lock = LockCoordinator::new(self.store, self.identity);
        if !lock.acquire_lock()? {
            let holder = lock.holder()?;
            error!(holder = %holder, "Did not acquire change log lock, exiting");
            return Err(DocmoveError::LockAcquisitionDenied { holder });
        }
        let guard = lock.guard();

        let result = self.migrate_locked();
        let released = guard.release();

        let mut report = match (result, released) {
            (Ok(report), Ok(())) => report,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    error!(error = %release_err, "Failed to release change log lock");
                }
                error!(error = %e, "Store update failed");
                return Err(e);
            }
        };

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            applied = report.applied,
            elapsed = %time::pretty_duration(started.elapsed()),
            "Store update successful"
        );
        Ok(report)
    }

    fn migrate_locked(&self) -> Result<MigrationReport, DocmoveError> {
        info!(source = %self.source.describe(), "Fetching change logs");
        let discovered = self.source.discover()?;
        let mut report = MigrationReport {
            discovered: discovered.len(),
            ..MigrationReport::default()
        };

        if discovered.is_empty() {
            info!("No change logs found");
        } else {
            let reconciled = Reconciler::new(self.store).reconcile(discovered)?;
            let ExecutionSummary {
                applied,
                skipped,
                resaved,
            } = Executor::new(self.store, self.source, self.applier, self.identity)
                .execute(reconciled)?;
            report.applied = applied;
            report.skipped = skipped;
            report.resaved = resaved;
        }

        self.run_index_hooks()?;
        Ok(report)
    }

    fn run_index_hooks(&self) -> Result<(), DocmoveError> {
        if self.options.build_deferred_indexes {
            info!("Building deferred indexes");
            self.applier.build_deferred_indexes(
                self.options.scope.as_deref(),
                self.options.collection.as_deref(),
            )?;
        }
        if let Some(timeout) = self.options.wait_for_indexes {
            info!(timeout_secs = timeout.as_secs(), "Waiting for indexes");
            self.applier.wait_for_indexes(timeout)?;
        }
        Ok(())
    }
}
