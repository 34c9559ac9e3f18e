//! SQLite-backed document store and content applier.
//!
//! Documents live in a single `documents` table keyed by string. Revision
//! tokens come from a store-wide counter bumped inside an `IMMEDIATE`
//! transaction, so tokens are never reused (not even after a delete) and
//! compare-and-save is atomic across processes sharing the database file.
//!
//! As a [`ContentApplier`], query scripts are executed statement by statement
//! as SQL on the same database, and json definitions (design documents,
//! search indexes, eventing functions) are stored under reserved key prefixes.

use crate::core::db;
use crate::core::error::DocmoveError;
use crate::core::executor::ContentApplier;
use crate::core::model::{CasToken, Document};
use crate::core::store::{DocumentStore, StoredDocument};
use crate::plugins::query;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Connection busy_timeout.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub const DESIGN_DOC_PREFIX: &str = "_design/";
pub const FTS_INDEX_PREFIX: &str = "_fts/";
pub const EVENTING_PREFIX: &str = "_eventing/";

const DEFAULT_COLLECTION: &str = "_default";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    scope: Option<String>,
    collection: Option<String>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DocmoveError> {
        let conn = db::initialize_documents_db(path, BUSY_TIMEOUT)?;
        info!(path = %path.display(), "Opened document store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            scope: None,
            collection: None,
        })
    }

    /// Targets imported documents at `scope.collection`. `_default` means unqualified.
    pub fn with_collection(mut self, scope: Option<String>, collection: Option<String>) -> Self {
        self.scope = scope;
        self.collection = collection;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key under which an imported document with `key` is stored.
    pub fn qualify(&self, key: &str) -> String {
        let scope = self
            .scope
            .as_deref()
            .filter(|s| *s != DEFAULT_COLLECTION);
        let collection = self
            .collection
            .as_deref()
            .filter(|c| *c != DEFAULT_COLLECTION);
        match (scope, collection) {
            (None, None) => key.to_string(),
            (scope, collection) => format!(
                "{}.{}::{}",
                scope.unwrap_or(DEFAULT_COLLECTION),
                collection.unwrap_or(DEFAULT_COLLECTION),
                key
            ),
        }
    }

    fn with_tx<R>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<R, DocmoveError>,
    ) -> Result<R, DocmoveError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn with_conn<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, DocmoveError>,
    ) -> Result<R, DocmoveError> {
        let conn = self.lock_conn()?;
        f(&conn)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, DocmoveError> {
        self.conn.lock().map_err(|_| {
            DocmoveError::ValidationError("SqliteStore connection lock poisoned".to_string())
        })
    }

    fn save_json(&self, key: &str, content: &str) -> Result<(), DocmoveError> {
        let body: JsonValue = serde_json::from_str(content)?;
        self.save(key, &body)?;
        Ok(())
    }
}

fn next_cas(tx: &Transaction<'_>) -> Result<CasToken, DocmoveError> {
    tx.execute(
        "UPDATE store_meta SET value = value + 1 WHERE name = 'revision'",
        [],
    )?;
    let value: i64 = tx.query_row(
        "SELECT value FROM store_meta WHERE name = 'revision'",
        [],
        |row| row.get(0),
    )?;
    Ok(CasToken(value as u64))
}

fn upsert(tx: &Transaction<'_>, key: &str, body: &JsonValue) -> Result<CasToken, DocmoveError> {
    let cas = next_cas(tx)?;
    tx.execute(
        "INSERT OR REPLACE INTO documents (key, body, cas) VALUES (?1, ?2, ?3)",
        params![key, serde_json::to_string(body)?, cas.0 as i64],
    )?;
    Ok(cas)
}

fn decode_row(body: String, cas: i64) -> Result<StoredDocument, DocmoveError> {
    Ok(StoredDocument {
        body: serde_json::from_str(&body)?,
        cas: CasToken(cas as u64),
    })
}

impl DocumentStore for SqliteStore {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn get(&self, key: &str) -> Result<Option<StoredDocument>, DocmoveError> {
        let row: Option<(String, i64)> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT body, cas FROM documents WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;
        row.map(|(body, cas)| decode_row(body, cas)).transpose()
    }

    fn save(&self, key: &str, body: &JsonValue) -> Result<CasToken, DocmoveError> {
        self.with_tx(|tx| upsert(tx, key, body))
    }

    fn check_and_save(
        &self,
        key: &str,
        body: &JsonValue,
        expected: Option<CasToken>,
    ) -> Result<CasToken, DocmoveError> {
        self.with_tx(|tx| {
            let current: Option<i64> = tx
                .query_row(
                    "SELECT cas FROM documents WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if current.map(|c| CasToken(c as u64)) != expected {
                return Err(DocmoveError::ConflictError {
                    key: key.to_string(),
                });
            }
            upsert(tx, key, body)
        })
    }

    fn delete(&self, key: &str) -> Result<(), DocmoveError> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, StoredDocument)>, DocmoveError> {
        let rows: Vec<(String, String, i64)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, body, cas FROM documents
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let rows = stmt
                .query_map(params![prefix], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter()
            .map(|(key, body, cas)| Ok((key, decode_row(body, cas)?)))
            .collect()
    }
}

impl ContentApplier for SqliteStore {
    fn apply_documents(&self, documents: &[Document]) -> Result<(), DocmoveError> {
        info!(count = documents.len(), "Importing documents");
        let parsed = documents
            .iter()
            .map(|doc| {
                let body: JsonValue = serde_json::from_str(&doc.content)?;
                Ok((self.qualify(&doc.key), body))
            })
            .collect::<Result<Vec<_>, DocmoveError>>()?;
        self.with_tx(|tx| {
            for (key, body) in &parsed {
                upsert(tx, key, body)?;
            }
            Ok(())
        })
    }

    fn apply_query(&self, content: &str) -> Result<(), DocmoveError> {
        let requests = query::extract_requests(content);
        info!(count = requests.len(), "Executing query requests");
        self.with_conn(|conn| {
            for request in &requests {
                debug!(request = %request, "Executing request");
                conn.execute_batch(request)?;
            }
            Ok(())
        })
    }

    fn apply_design_doc(&self, name: &str, content: &str) -> Result<(), DocmoveError> {
        info!(document = %name, "Inserting design document");
        self.save_json(&format!("{}{}", DESIGN_DOC_PREFIX, name), content)
    }

    fn apply_fts_index(&self, name: &str, content: &str) -> Result<(), DocmoveError> {
        info!(document = %name, "Inserting search index");
        self.save_json(&format!("{}{}", FTS_INDEX_PREFIX, name), content)
    }

    fn apply_eventing_function(&self, name: &str, content: &str) -> Result<(), DocmoveError> {
        info!(document = %name, "Inserting eventing function");
        self.save_json(&format!("{}{}", EVENTING_PREFIX, name), content)
    }

    fn build_deferred_indexes(
        &self,
        scope: Option<&str>,
        collection: Option<&str>,
    ) -> Result<(), DocmoveError> {
        info!(
            scope = scope.unwrap_or(DEFAULT_COLLECTION),
            collection = collection.unwrap_or(DEFAULT_COLLECTION),
            "Refreshing index statistics"
        );
        self.with_conn(|conn| {
            conn.execute_batch("ANALYZE;")?;
            Ok(())
        })
    }

    fn wait_for_indexes(&self, timeout: Duration) -> Result<(), DocmoveError> {
        let started = Instant::now();
        loop {
            let status: String = self.with_conn(|conn| {
                Ok(conn.query_row("PRAGMA quick_check;", [], |row| row.get(0))?)
            })?;
            if status == "ok" {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DocmoveError::ValidationError(format!(
                    "indexes not ready after {}s: {}",
                    timeout.as_secs(),
                    status
                )));
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}
