//! Store abstraction for docmove's durable state.
//!
//! Change records and the lock record live in the same document store the
//! changesets are applied to. The engine only needs keyed json documents with a
//! revision token per document; concrete backends live in `plugins`.

use crate::core::error::DocmoveError;
use crate::core::model::{CasToken, ChangeRecord, LockRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::marker::PhantomData;

/// A json body together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub body: JsonValue,
    pub cas: CasToken,
}

/// Keyed json document storage with optimistic concurrency.
///
/// Implementations own their own transient-failure policy; any error other than
/// [`DocmoveError::ConflictError`] is treated as fatal by callers.
pub trait DocumentStore {
    /// Human-readable name of the store, for logs.
    fn name(&self) -> String;

    fn get(&self, key: &str) -> Result<Option<StoredDocument>, DocmoveError>;

    /// Unconditional upsert.
    fn save(&self, key: &str, body: &JsonValue) -> Result<CasToken, DocmoveError>;

    /// Insert-if-absent when `expected` is `None`, otherwise replace only if the
    /// stored revision still equals `expected`. Losing either race yields
    /// [`DocmoveError::ConflictError`].
    fn check_and_save(
        &self,
        key: &str,
        body: &JsonValue,
        expected: Option<CasToken>,
    ) -> Result<CasToken, DocmoveError>;

    /// Removes a document. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), DocmoveError>;

    /// All documents whose key starts with `prefix`, ordered by key.
    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, StoredDocument)>, DocmoveError>;
}

/// A persisted entity that remembers the revision it was read or written at.
pub trait Entity: Serialize + DeserializeOwned {
    fn cas(&self) -> Option<CasToken>;
    fn set_cas(&mut self, cas: Option<CasToken>);
}

impl Entity for ChangeRecord {
    fn cas(&self) -> Option<CasToken> {
        self.cas
    }
    fn set_cas(&mut self, cas: Option<CasToken>) {
        self.cas = cas;
    }
}

impl Entity for LockRecord {
    fn cas(&self) -> Option<CasToken> {
        self.cas
    }
    fn set_cas(&mut self, cas: Option<CasToken>) {
        self.cas = cas;
    }
}

/// Typed view over a [`DocumentStore`] for one entity type.
pub struct Repository<'a, E> {
    store: &'a dyn DocumentStore,
    _entity: PhantomData<E>,
}

impl<'a, E: Entity> Repository<'a, E> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store_name(&self) -> String {
        self.store.name()
    }

    /// Reads and decodes `key`, with the revision set on the entity.
    pub fn find_one(&self, key: &str) -> Result<Option<E>, DocmoveError> {
        match self.store.get(key)? {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    pub fn find_by_prefix(&self, prefix: &str) -> Result<Vec<E>, DocmoveError> {
        self.store
            .list_prefix(prefix)?
            .into_iter()
            .map(|(_, doc)| decode(doc))
            .collect()
    }

    /// Unconditional upsert; refreshes the entity's revision.
    pub fn save(&self, key: &str, entity: &mut E) -> Result<(), DocmoveError> {
        let body = serde_json::to_value(&*entity)?;
        let cas = self.store.save(key, &body)?;
        entity.set_cas(Some(cas));
        Ok(())
    }

    /// Optimistic write using the entity's current revision.
    pub fn check_and_save(&self, key: &str, entity: &mut E) -> Result<(), DocmoveError> {
        let body = serde_json::to_value(&*entity)?;
        let cas = self.store.check_and_save(key, &body, entity.cas())?;
        entity.set_cas(Some(cas));
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), DocmoveError> {
        self.store.delete(key)
    }
}

fn decode<E: Entity>(doc: StoredDocument) -> Result<E, DocmoveError> {
    let mut entity: E = serde_json::from_value(doc.body)?;
    entity.set_cas(Some(doc.cas));
    Ok(entity)
}
