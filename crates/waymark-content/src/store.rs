//! The remote document store seam.
//!
//! The resolver never speaks to a database directly.  It asks a
//! [`DocumentStore`] for a document by collection and id, and the store
//! translates that into whatever protocol the backend speaks (Firestore REST
//! in production, a seeded map in tests and demos).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Field values
// ─────────────────────────────────────────────────────────────────────────────

/// A single typed field of a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    String(String),
    Double(f64),
    Integer(i64),
    Boolean(bool),
    Null,
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value.  Integers are widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Double(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Double(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// A document: field name → typed value.
pub type Document = HashMap<String, FieldValue>;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by a [`DocumentStore`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store's access rules rejected the read.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// The request never produced a response (DNS, TLS, connection reset…).
    #[error("Transport error: {0}")]
    Transport(String),
    /// A response arrived but could not be decoded.
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Any other non-success status.
    #[error("Store returned status {code}: {message}")]
    Status { code: u16, message: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// DocumentStore trait
// ─────────────────────────────────────────────────────────────────────────────

/// Read access to a collection-oriented document database.
///
/// # Contract
///
/// * `get_document` – `Ok(None)` means the document does not exist; every
///   other failure is an `Err`.
/// * `list_documents` – every `(id, document)` pair of the collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, collection: &str, id: &str)
    -> Result<Option<Document>, StoreError>;

    async fn list_documents(&self, collection: &str)
    -> Result<Vec<(String, Document)>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// InMemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// A seedable in-process store.
///
/// Counts every `get_document` call so tests can assert how many remote
/// fetches a resolver issued.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: Mutex<HashMap<String, HashMap<String, Document>>>,
    failures: Mutex<HashMap<String, StoreError>>,
    fetches: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a document.
    pub fn insert(&self, collection: &str, id: &str, document: Document) {
        self.lock_collections()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    /// Builder form of [`insert`][Self::insert] for a building-style
    /// document with `name`, `description`, `latitude` and `longitude`.
    pub fn with_place(
        self,
        collection: &str,
        id: &str,
        name: &str,
        description: &str,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        self.insert(
            collection,
            id,
            Document::from([
                ("name".to_string(), FieldValue::from(name)),
                ("description".to_string(), FieldValue::from(description)),
                ("latitude".to_string(), FieldValue::from(latitude)),
                ("longitude".to_string(), FieldValue::from(longitude)),
            ]),
        );
        self
    }

    pub fn remove(&self, collection: &str, id: &str) {
        if let Some(docs) = self.lock_collections().get_mut(collection) {
            docs.remove(id);
        }
    }

    /// Make every subsequent read of `id` fail with `error`.
    pub fn fail_with(&self, id: &str, error: StoreError) {
        self.lock_failures().insert(id.to_string(), error);
    }

    pub fn clear_failure(&self, id: &str) {
        self.lock_failures().remove(id);
    }

    /// Number of `get_document` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lock_collections(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Document>>> {
        self.collections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_failures(&self) -> MutexGuard<'_, HashMap<String, StoreError>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.lock_failures().get(id) {
            return Err(err.clone());
        }
        Ok(self
            .lock_collections()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn list_documents(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        Ok(self
            .lock_collections()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
