//! In-process document store.
//!
//! Same contract as the SQLite store, without durability. Used by tests and by
//! callers embedding the engine against a store they mirror themselves.

use crate::core::error::DocmoveError;
use crate::core::model::CasToken;
use crate::core::store::{DocumentStore, StoredDocument};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, StoredDocument>,
    revision: u64,
}

impl Inner {
    fn next_cas(&mut self) -> CasToken {
        self.revision += 1;
        CasToken(self.revision)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Result<R, DocmoveError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| DocmoveError::ValidationError("MemoryStore lock poisoned".to_string()))?;
        Ok(f(&mut inner))
    }
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn get(&self, key: &str) -> Result<Option<StoredDocument>, DocmoveError> {
        self.with_inner(|inner| inner.docs.get(key).cloned())
    }

    fn save(&self, key: &str, body: &JsonValue) -> Result<CasToken, DocmoveError> {
        self.with_inner(|inner| {
            let cas = inner.next_cas();
            inner.docs.insert(
                key.to_string(),
                StoredDocument {
                    body: body.clone(),
                    cas,
                },
            );
            cas
        })
    }

    fn check_and_save(
        &self,
        key: &str,
        body: &JsonValue,
        expected: Option<CasToken>,
    ) -> Result<CasToken, DocmoveError> {
        self.with_inner(|inner| {
            let current = inner.docs.get(key).map(|d| d.cas);
            if current != expected {
                return Err(DocmoveError::ConflictError {
                    key: key.to_string(),
                });
            }
            let cas = inner.next_cas();
            inner.docs.insert(
                key.to_string(),
                StoredDocument {
                    body: body.clone(),
                    cas,
                },
            );
            Ok(cas)
        })?
    }

    fn delete(&self, key: &str) -> Result<(), DocmoveError> {
        self.with_inner(|inner| {
            inner.docs.remove(key);
        })
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, StoredDocument)>, DocmoveError> {
        self.with_inner(|inner| {
            inner
                .docs
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }
}
