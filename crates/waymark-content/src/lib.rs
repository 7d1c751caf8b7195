//! # waymark-content
//!
//! Resolves marker identifiers into [`ContentRecord`]s fetched from a remote
//! document store.
//!
//! # Modules
//!
//! - [`store`] – the [`DocumentStore`] seam, typed field values and the
//!   seedable [`InMemoryStore`].
//! - [`firestore`] – [`FirestoreStore`], a Firestore REST v1 client.
//! - [`resolver`] – [`ContentResolver`]: cache, single-flight fetches and
//!   typed fallback records.
//!
//! [`ContentRecord`]: waymark_types::ContentRecord

pub mod firestore;
pub mod resolver;
pub mod store;

pub use firestore::FirestoreStore;
pub use resolver::{CatalogEntry, ContentResolver, ResolverConfig};
pub use store::{Document, DocumentStore, FieldValue, InMemoryStore, StoreError};
