use docmove::core::error::DocmoveError;
use docmove::core::executor::ContentApplier;
use docmove::core::identity::FixedIdentity;
use docmove::core::lock::LockCoordinator;
use docmove::core::migration::{MigrateOptions, Migrator};
use docmove::core::model::{
    CHANGELOG_PREFIX, ChangeRecord, ChangeType, Document, LOCK_KEY, Status, change_key,
};
use docmove::core::source::ChangeSource;
use docmove::core::store::{DocumentStore, Repository};
use docmove::plugins::memory_store::MemoryStore;
use std::cell::RefCell;
use std::collections::HashSet;
use std::time::Duration;

/// In-memory changesets: (version, description, checksum).
#[derive(Default)]
struct FakeSource {
    changes: RefCell<Vec<(String, String, Option<String>)>>,
}

impl FakeSource {
    fn with(changes: &[(&str, &str, &str)]) -> Self {
        let source = Self::default();
        for (version, description, checksum) in changes {
            source.push(version, description, checksum);
        }
        source
    }

    fn push(&self, version: &str, description: &str, checksum: &str) {
        self.changes.borrow_mut().push((
            version.to_string(),
            description.to_string(),
            Some(checksum.to_string()),
        ));
    }

    fn remove(&self, version: &str) {
        self.changes.borrow_mut().retain(|change| change.0 != version);
    }

    fn set_checksum(&self, version: &str, checksum: &str) {
        for change in self.changes.borrow_mut().iter_mut() {
            if change.0 == version {
                change.2 = Some(checksum.to_string());
            }
        }
    }

    fn set_description(&self, version: &str, description: &str) {
        for change in self.changes.borrow_mut().iter_mut() {
            if change.0 == version {
                change.1 = description.to_string();
            }
        }
    }
}

impl ChangeSource for FakeSource {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    fn discover(&self) -> Result<Vec<ChangeRecord>, DocmoveError> {
        let mut records: Vec<ChangeRecord> = self
            .changes
            .borrow()
            .iter()
            .map(|(version, description, checksum)| {
                ChangeRecord::discovered(
                    version.clone(),
                    description.clone(),
                    ChangeType::Query,
                    format!("V{}__{}.n1ql", version, description.replace(' ', "_")),
                    checksum.clone(),
                )
            })
            .collect();
        records.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(records)
    }

    fn read_file(&self, script: &str) -> Result<String, DocmoveError> {
        Ok(format!("-- {}", script))
    }

    fn read_documents(&self, _script: &str) -> Result<Vec<Document>, DocmoveError> {
        Ok(Vec::new())
    }
}

/// Records applied scripts; fails any script listed in `failing`.
#[derive(Default)]
struct RecordingApplier {
    applied: RefCell<Vec<String>>,
    failing: RefCell<HashSet<String>>,
    index_builds: RefCell<usize>,
    index_waits: RefCell<Vec<Duration>>,
}

impl RecordingApplier {
    fn fail_on(&self, script: &str) {
        self.failing.borrow_mut().insert(format!("-- {}", script));
    }

    fn heal(&self) {
        self.failing.borrow_mut().clear();
    }

    fn applied(&self) -> Vec<String> {
        self.applied.borrow().clone()
    }
}

impl ContentApplier for RecordingApplier {
    fn apply_documents(&self, _documents: &[Document]) -> Result<(), DocmoveError> {
        Ok(())
    }

    fn apply_query(&self, content: &str) -> Result<(), DocmoveError> {
        if self.failing.borrow().contains(content) {
            return Err(DocmoveError::ValidationError("syntax error".to_string()));
        }
        self.applied.borrow_mut().push(content.to_string());
        Ok(())
    }

    fn apply_design_doc(&self, _name: &str, _content: &str) -> Result<(), DocmoveError> {
        Ok(())
    }

    fn apply_fts_index(&self, _name: &str, _content: &str) -> Result<(), DocmoveError> {
        Ok(())
    }

    fn apply_eventing_function(&self, _name: &str, _content: &str) -> Result<(), DocmoveError> {
        Ok(())
    }

    fn build_deferred_indexes(
        &self,
        _scope: Option<&str>,
        _collection: Option<&str>,
    ) -> Result<(), DocmoveError> {
        *self.index_builds.borrow_mut() += 1;
        Ok(())
    }

    fn wait_for_indexes(&self, timeout: Duration) -> Result<(), DocmoveError> {
        self.index_waits.borrow_mut().push(timeout);
        Ok(())
    }
}

fn migrate(
    store: &MemoryStore,
    source: &FakeSource,
    applier: &RecordingApplier,
) -> Result<docmove::core::migration::MigrationReport, DocmoveError> {
    let identity = FixedIdentity("ci".to_string());
    Migrator::new(store, source, applier, &identity).migrate()
}

fn records(store: &MemoryStore) -> Vec<ChangeRecord> {
    Repository::<ChangeRecord>::new(store)
        .find_by_prefix(CHANGELOG_PREFIX)
        .expect("list change records")
}

fn record(store: &MemoryStore, version: &str) -> ChangeRecord {
    Repository::<ChangeRecord>::new(store)
        .find_one(&change_key(version))
        .expect("read change record")
        .expect("change record exists")
}

#[test]
fn fresh_store_applies_everything_with_contiguous_orders() {
    let store = MemoryStore::new();
    let source = FakeSource::with(&[
        ("1", "create", "c1"),
        ("2", "insert", "c2"),
        ("3", "index", "c3"),
    ]);
    let applier = RecordingApplier::default();

    let report = migrate(&store, &source, &applier).expect("migrate");
    assert_eq!(report.discovered, 3);
    assert_eq!(report.applied, 3);
    assert_eq!(applier.applied().len(), 3);

    let stored = records(&store);
    let orders: Vec<Option<u64>> = stored.iter().map(|r| r.order).collect();
    assert_eq!(orders, vec![Some(1), Some(2), Some(3)]);
    for r in &stored {
        assert_eq!(r.status, Some(Status::Executed));
        assert_eq!(r.runner.as_deref(), Some("ci"));
        assert!(r.timestamp.is_some());
        assert!(r.duration.is_some());
    }
    assert!(store.get(LOCK_KEY).unwrap().is_none(), "lock must be released");
}

#[test]
fn second_run_is_a_no_op() {
    let store = MemoryStore::new();
    let source = FakeSource::with(&[("1", "create", "c1"), ("2", "insert", "c2")]);
    let applier = RecordingApplier::default();

    migrate(&store, &source, &applier).expect("first run");
    let before = records(&store);

    let report = migrate(&store, &source, &applier).expect("second run");
    assert_eq!(report.applied, 0);
    assert_eq!(report.resaved, 0);
    assert_eq!(applier.applied().len(), 2, "nothing re-applied");
    assert_eq!(records(&store), before);
}

#[test]
fn older_version_after_newer_executed_is_skipped() {
    let store = MemoryStore::new();
    let applier = RecordingApplier::default();

    // Executed "2" with order 3, as left by an earlier history.
    let repo = Repository::<ChangeRecord>::new(&store);
    let mut executed = ChangeRecord::discovered(
        "2",
        "insert",
        ChangeType::Query,
        "V2__insert.n1ql",
        Some("c2".into()),
    );
    executed.status = Some(Status::Executed);
    executed.order = Some(3);
    repo.save(&executed.key(), &mut executed).unwrap();

    let source = FakeSource::with(&[("1", "late", "c1"), ("2", "insert", "c2")]);
    let report = migrate(&store, &source, &applier).expect("migrate");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 0);
    assert!(applier.applied().is_empty());

    let late = record(&store, "1");
    assert_eq!(late.status, Some(Status::Skipped));
    assert_eq!(late.order, None);

    // Skipped is final, even on later runs.
    let report = migrate(&store, &source, &applier).expect("rerun");
    assert_eq!(report.skipped, 0);
    assert!(applier.applied().is_empty());

    // New work continues after the highest order.
    source.push("3", "next", "c3");
    migrate(&store, &source, &applier).expect("third run");
    assert_eq!(record(&store, "3").order, Some(4));
}

#[test]
fn modified_executed_changeset_is_refused() {
    let store = MemoryStore::new();
    let source = FakeSource::with(&[("1", "create", "c1")]);
    let applier = RecordingApplier::default();
    migrate(&store, &source, &applier).expect("first run");

    source.set_checksum("1", "tampered");
    source.push("2", "insert", "c2");
    let err = migrate(&store, &source, &applier).unwrap_err();
    assert!(
        matches!(&err, DocmoveError::ChecksumIntegrityError { version, .. } if version == "1"),
        "{err}"
    );

    assert_eq!(applier.applied().len(), 1, "nothing applied after drift");
    assert_eq!(record(&store, "1").checksum.as_deref(), Some("c1"));
    assert!(store.get(&change_key("2")).unwrap().is_none());
    assert!(store.get(LOCK_KEY).unwrap().is_none(), "lock released on failure");
}

#[test]
fn failure_halts_the_batch_and_fixed_changeset_is_retried() {
    let store = MemoryStore::new();
    let source = FakeSource::with(&[
        ("1", "create", "c1"),
        ("2", "broken", "c2"),
        ("3", "after", "c3"),
    ]);
    let applier = RecordingApplier::default();
    applier.fail_on("V2__broken.n1ql");

    let err = migrate(&store, &source, &applier).unwrap_err();
    assert!(
        matches!(&err, DocmoveError::ExecutionError { version, .. } if version == "2"),
        "{err}"
    );
    assert_eq!(record(&store, "1").status, Some(Status::Executed));
    let failed = record(&store, "2");
    assert_eq!(failed.status, Some(Status::Failed));
    assert_eq!(failed.order, None);
    assert!(store.get(&change_key("3")).unwrap().is_none(), "fail fast");
    assert!(store.get(LOCK_KEY).unwrap().is_none());

    // A fixed failed changeset is retried and takes the next order.
    applier.heal();
    source.set_checksum("2", "c2-fixed");
    let report = migrate(&store, &source, &applier).expect("retry");
    assert_eq!(report.applied, 2);

    let retried = record(&store, "2");
    assert_eq!(retried.status, Some(Status::Executed));
    assert_eq!(retried.order, Some(2));
    assert_eq!(retried.checksum.as_deref(), Some("c2-fixed"));
    assert_eq!(record(&store, "3").order, Some(3));
}

#[test]
fn description_change_is_saved_without_reapplying() {
    let store = MemoryStore::new();
    let source = FakeSource::with(&[("1", "create", "c1")]);
    let applier = RecordingApplier::default();
    migrate(&store, &source, &applier).expect("first run");

    source.set_description("1", "create users");
    let report = migrate(&store, &source, &applier).expect("second run");
    assert_eq!(report.resaved, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(applier.applied().len(), 1);

    let updated = record(&store, "1");
    assert_eq!(updated.description, "create users");
    assert_eq!(updated.script, "V1__create_users.n1ql");
    assert_eq!(updated.status, Some(Status::Executed));
    assert_eq!(updated.order, Some(1));
}

#[test]
fn migration_is_denied_while_another_runner_holds_the_lock() {
    let store = MemoryStore::new();
    let other = FixedIdentity("other-host".to_string());
    let mut held = LockCoordinator::new(&store, &other);
    assert!(held.acquire_lock().unwrap());

    let source = FakeSource::with(&[("1", "create", "c1")]);
    let applier = RecordingApplier::default();
    let err = migrate(&store, &source, &applier).unwrap_err();
    assert!(
        matches!(&err, DocmoveError::LockAcquisitionDenied { holder } if holder == "other-host"),
        "{err}"
    );
    assert!(applier.applied().is_empty());
    assert!(records(&store).is_empty());
    assert!(held.is_lock_acquired().unwrap(), "holder keeps its lock");
}

#[test]
fn empty_source_still_runs_index_hooks_and_releases_lock() {
    let store = MemoryStore::new();
    let source = FakeSource::default();
    let applier = RecordingApplier::default();
    let identity = FixedIdentity("ci".to_string());

    let report = Migrator::new(&store, &source, &applier, &identity)
        .with_options(MigrateOptions {
            build_deferred_indexes: true,
            wait_for_indexes: Some(Duration::from_secs(5)),
            ..MigrateOptions::default()
        })
        .migrate()
        .expect("migrate");

    assert_eq!(report.discovered, 0);
    assert_eq!(*applier.index_builds.borrow(), 1);
    assert_eq!(*applier.index_waits.borrow(), vec![Duration::from_secs(5)]);
    assert!(store.is_empty());
}

#[test]
fn index_hooks_are_off_by_default() {
    let store = MemoryStore::new();
    let source = FakeSource::with(&[("1", "create", "c1")]);
    let applier = RecordingApplier::default();
    migrate(&store, &source, &applier).expect("migrate");
    assert_eq!(*applier.index_builds.borrow(), 0);
    assert!(applier.index_waits.borrow().is_empty());
}

#[test]
fn executed_records_missing_from_source_still_bound_version_and_order() {
    let store = MemoryStore::new();
    let source = FakeSource::with(&[
        ("1", "create", "c1"),
        ("2", "insert", "c2"),
        ("3", "index", "c3"),
    ]);
    let applier = RecordingApplier::default();
    migrate(&store, &source, &applier).expect("first run");

    source.remove("3");
    source.push("2.5", "late", "c25");
    source.push("4", "next", "c4");
    let report = migrate(&store, &source, &applier).expect("second run");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 1);

    let late = record(&store, "2.5");
    assert_eq!(late.status, Some(Status::Skipped));
    assert_eq!(late.order, None);
    assert_eq!(record(&store, "3").order, Some(3));
    assert_eq!(record(&store, "4").order, Some(4));
    assert!(!applier.applied().iter().any(|s| s.contains("V2.5__")));
}

#[test]
fn reset_checksum_is_adopted_without_reapplying() {
    let store = MemoryStore::new();
    let repo = Repository::<ChangeRecord>::new(&store);
    let mut executed = ChangeRecord::discovered(
        "1",
        "create",
        ChangeType::Query,
        "V1__create.n1ql",
        None,
    );
    executed.status = Some(Status::Executed);
    executed.order = Some(1);
    repo.save(&executed.key(), &mut executed).unwrap();

    let source = FakeSource::with(&[("1", "create", "c1")]);
    let applier = RecordingApplier::default();
    let report = migrate(&store, &source, &applier).expect("migrate");
    assert_eq!(report.resaved, 1);
    assert_eq!(report.applied, 0);
    assert!(applier.applied().is_empty());

    let stored = record(&store, "1");
    assert_eq!(stored.checksum.as_deref(), Some("c1"));
    assert_eq!(stored.order, Some(1));
    assert_eq!(stored.status, Some(Status::Executed));
}

#[test]
fn versions_compare_as_strings() {
    let store = MemoryStore::new();
    let source = FakeSource::with(&[("9", "nine", "c9")]);
    let applier = RecordingApplier::default();
    migrate(&store, &source, &applier).expect("first run");

    // "10" sorts before "9", so it is never applied.
    source.push("10", "ten", "c10");
    let report = migrate(&store, &source, &applier).expect("second run");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 0);

    let ten = record(&store, "10");
    assert_eq!(ten.status, Some(Status::Skipped));
    assert_eq!(ten.order, None);
    assert_eq!(applier.applied().len(), 1);
}
