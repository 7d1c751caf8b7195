//! [`ContentResolver`] – marker identifier → [`ContentRecord`].
//!
//! `resolve` never fails: every store outcome maps onto a record the UI can
//! show.
//!
//! | Outcome                         | Result                                  | Cached |
//! |---------------------------------|-----------------------------------------|--------|
//! | empty identifier                | [`ContentRecord::missing_identifier`]   | no     |
//! | document found                  | parsed record                           | yes*   |
//! | document missing                | [`ContentRecord::not_found`]            | no     |
//! | permission denied               | [`ContentRecord::permission_denied`]    | no     |
//! | transport / decode / timeout    | [`ContentRecord::fetch_failed`]         | no     |
//!
//! \* when `enable_cache` is set.
//!
//! Concurrent calls for the same identifier share one in-flight fetch.  The
//! fetch runs as its own tokio task, so it finishes (and frees its in-flight
//! slot) even when every caller awaiting it has been dropped.  It clears the
//! slot and fills the cache in the same critical section, so a caller either
//! joins the fetch or sees its result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use waymark_types::ContentRecord;

use crate::store::{Document, DocumentStore, StoreError};

const DEFAULT_TITLE: &str = "Sin nombre";
const DEFAULT_BODY: &str = "Sin descripción disponible";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Collection holding one document per marker identifier.
    pub collection: String,
    pub enable_cache: bool,
    /// Upper bound on a single remote fetch.  `None` waits indefinitely.
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            collection: "buildingLocations".to_string(),
            enable_cache: true,
            fetch_timeout_secs: None,
        }
    }
}

/// One document of the collection, as listed by
/// [`ContentResolver::list_destinations`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub record: ContentRecord,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

type InFlight = Shared<BoxFuture<'static, ContentRecord>>;

#[derive(Default)]
struct ResolverState {
    cache: HashMap<String, ContentRecord>,
    in_flight: HashMap<String, InFlight>,
}

enum FetchOutcome {
    Found(ContentRecord),
    Fallback(ContentRecord),
}

// ─────────────────────────────────────────────────────────────────────────────
// ContentResolver
// ─────────────────────────────────────────────────────────────────────────────

pub struct ContentResolver {
    store: Arc<dyn DocumentStore>,
    config: ResolverConfig,
    state: Arc<Mutex<ResolverState>>,
}

impl ContentResolver {
    pub fn new(store: Arc<dyn DocumentStore>, config: ResolverConfig) -> Self {
        Self {
            store,
            config,
            state: Arc::new(Mutex::new(ResolverState::default())),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `id` into a record.  Never fails; see the module docs for the
    /// fallback table.
    #[instrument(skip(self), fields(collection = %self.config.collection))]
    pub async fn resolve(&self, id: &str) -> ContentRecord {
        if id.is_empty() {
            warn!("resolve called with an empty identifier");
            return ContentRecord::missing_identifier();
        }

        let pending = {
            let mut state = lock(&self.state);
            if self.config.enable_cache {
                if let Some(record) = state.cache.get(id) {
                    debug!("served from cache");
                    return record.clone();
                }
            }
            match state.in_flight.get(id) {
                Some(pending) => {
                    debug!("joining in-flight fetch");
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_fetch(id.to_string());
                    state.in_flight.insert(id.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Drop every cached record.  In-flight fetches keep running and may
    /// repopulate the cache when they finish.
    pub fn clear_cache(&self) {
        let mut state = lock(&self.state);
        let dropped = state.cache.len();
        state.cache.clear();
        info!(dropped, "content cache cleared");
    }

    pub fn cached_count(&self) -> usize {
        lock(&self.state).cache.len()
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    /// List every document of the collection as a navigable catalogue,
    /// sorted by title.  Store errors degrade to an empty list.
    #[instrument(skip(self), fields(collection = %self.config.collection))]
    pub async fn list_destinations(&self) -> Vec<CatalogEntry> {
        let documents = match self.store.list_documents(&self.config.collection).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(error = %e, "could not list destinations");
                return Vec::new();
            }
        };

        let mut entries: Vec<CatalogEntry> = documents
            .into_iter()
            .map(|(id, doc)| CatalogEntry {
                record: parse_record(&doc),
                id,
            })
            .collect();
        entries.sort_by(|a, b| a.record.title.cmp(&b.record.title).then(a.id.cmp(&b.id)));
        info!(count = entries.len(), "destinations listed");
        entries
    }

    /// Start the fetch for `id` on the runtime and hand back a future every
    /// caller can await.  Must be called from within a tokio runtime.
    fn spawn_fetch(&self, id: String) -> InFlight {
        let handle = tokio::spawn(self.fetch_task(id.clone()));
        let state = Arc::clone(&self.state);
        async move {
            match handle.await {
                Ok(record) => record,
                Err(e) => {
                    warn!(marker = %id, error = %e, "document fetch task aborted");
                    lock(&state).in_flight.remove(&id);
                    ContentRecord::fetch_failed(&id)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Build the fetch for `id`.  Owns everything it touches so it can
    /// outlive the caller that created it.
    fn fetch_task(&self, id: String) -> impl Future<Output = ContentRecord> + Send + use<> {
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        let collection = self.config.collection.clone();
        let enable_cache = self.config.enable_cache;
        let timeout = self.config.fetch_timeout_secs.map(Duration::from_secs);

        async move {
            let outcome = fetch_outcome(store.as_ref(), &collection, &id, timeout).await;

            let mut state = lock(&state);
            state.in_flight.remove(&id);
            match outcome {
                FetchOutcome::Found(record) => {
                    if enable_cache {
                        state.cache.insert(id, record.clone());
                    }
                    record
                }
                FetchOutcome::Fallback(record) => record,
            }
        }
    }
}

async fn fetch_outcome(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    timeout: Option<Duration>,
) -> FetchOutcome {
    debug!(marker = %id, "fetching document");
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, store.get_document(collection, id)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(marker = %id, timeout_secs = limit.as_secs(), "document fetch timed out");
                return FetchOutcome::Fallback(ContentRecord::fetch_failed(id));
            }
        },
        None => store.get_document(collection, id).await,
    };

    match result {
        Ok(Some(doc)) => {
            let record = parse_record(&doc);
            info!(marker = %id, title = %record.title, "document resolved");
            FetchOutcome::Found(record)
        }
        Ok(None) => {
            warn!(marker = %id, collection, "document not found");
            FetchOutcome::Fallback(ContentRecord::not_found(id, collection))
        }
        Err(StoreError::PermissionDenied(reason)) => {
            warn!(marker = %id, %reason, "permission denied by store rules");
            FetchOutcome::Fallback(ContentRecord::permission_denied(id))
        }
        Err(e) => {
            warn!(marker = %id, error = %e, "document fetch failed");
            FetchOutcome::Fallback(ContentRecord::fetch_failed(id))
        }
    }
}

/// Parse a stored document with per-field defaults.
pub fn parse_record(doc: &Document) -> ContentRecord {
    let text = |field: &str, default: &str| {
        doc.get(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    };
    let number = |field: &str| doc.get(field).and_then(|v| v.as_f64()).unwrap_or(0.0);

    ContentRecord::new(
        text("name", DEFAULT_TITLE),
        text("description", DEFAULT_BODY),
        number("latitude"),
        number("longitude"),
    )
}

fn lock(state: &Mutex<ResolverState>) -> MutexGuard<'_, ResolverState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldValue, InMemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    const COLLECTION: &str = "buildingLocations";

    fn seeded() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new().with_place(
            COLLECTION,
            "library",
            "Biblioteca",
            "Biblioteca central",
            13.7200,
            -89.2000,
        ))
    }

    fn resolver_over(store: Arc<dyn DocumentStore>) -> ContentResolver {
        ContentResolver::new(store, ResolverConfig::default())
    }

    /// Holds every fetch until the test opens the gate.
    struct GatedStore {
        inner: InMemoryStore,
        gate: Semaphore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for GatedStore {
        async fn get_document(
            &self,
            collection: &str,
            id: &str,
        ) -> Result<Option<Document>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await;
            self.inner.get_document(collection, id).await
        }

        async fn list_documents(
            &self,
            collection: &str,
        ) -> Result<Vec<(String, Document)>, StoreError> {
            self.inner.list_documents(collection).await
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        async fn get_document(&self, _: &str, _: &str) -> Result<Option<Document>, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }

        async fn list_documents(&self, _: &str) -> Result<Vec<(String, Document)>, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn empty_identifier_never_hits_the_store() {
        let store = seeded();
        let resolver = resolver_over(store.clone());

        let record = resolver.resolve("").await;

        assert_eq!(record, ContentRecord::missing_identifier());
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn found_records_are_parsed_and_cached() {
        let store = seeded();
        let resolver = resolver_over(store.clone());

        let first = resolver.resolve("library").await;
        let second = resolver.resolve("library").await;

        assert_eq!(first.title, "Biblioteca");
        assert_eq!(first.latitude, 13.72);
        assert_eq!(first, second);
        assert_eq!(store.fetch_count(), 1);
        assert_eq!(resolver.cached_count(), 1);
    }

    #[tokio::test]
    async fn disabled_cache_fetches_every_time() {
        let store = seeded();
        let resolver = ContentResolver::new(
            store.clone(),
            ResolverConfig {
                enable_cache: false,
                ..ResolverConfig::default()
            },
        );

        resolver.resolve("library").await;
        resolver.resolve("library").await;

        assert_eq!(store.fetch_count(), 2);
        assert_eq!(resolver.cached_count(), 0);
    }

    #[tokio::test]
    async fn not_found_is_reported_and_never_cached() {
        let store = seeded();
        let resolver = resolver_over(store.clone());

        let record = resolver.resolve("doc123").await;
        resolver.resolve("doc123").await;

        assert!(record.title.contains("Not Found"));
        assert!(record.body.contains("doc123"));
        assert!(record.body.contains(COLLECTION));
        assert_eq!(store.fetch_count(), 2);
        assert_eq!(resolver.cached_count(), 0);
    }

    #[tokio::test]
    async fn permission_denied_maps_to_its_own_fallback() {
        let store = seeded();
        store.fail_with("library", StoreError::PermissionDenied("rules".into()));
        let resolver = resolver_over(store.clone());

        let record = resolver.resolve("library").await;

        assert_eq!(record, ContentRecord::permission_denied("library"));
        assert_eq!(resolver.cached_count(), 0);
    }

    #[tokio::test]
    async fn transport_errors_use_generic_fallback() {
        let resolver = resolver_over(Arc::new(BrokenStore));
        let record = resolver.resolve("library").await;
        assert_eq!(record, ContentRecord::fetch_failed("library"));
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn missing_fields_take_defaults() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(
            COLLECTION,
            "bare",
            Document::from([
                ("latitude".to_string(), FieldValue::Integer(13)),
                ("longitude".to_string(), FieldValue::from("west")),
            ]),
        );
        let resolver = resolver_over(store);

        let record = resolver.resolve("bare").await;

        assert_eq!(record.title, "Sin nombre");
        assert_eq!(record.body, "Sin descripción disponible");
        assert_eq!(record.latitude, 13.0);
        assert_eq!(record.longitude, 0.0);
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let store = Arc::new(GatedStore {
            inner: InMemoryStore::new().with_place(COLLECTION, "library", "Biblioteca", "", 1.0, 2.0),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver_over(store.clone());

        let (a, b, ()) = tokio::join!(
            resolver.resolve("library"),
            resolver.resolve("library"),
            async {
                tokio::task::yield_now().await;
                assert_eq!(resolver.in_flight_count(), 1);
                store.gate.add_permits(8);
            }
        );

        assert_eq!(a.title, "Biblioteca");
        assert_eq!(a, b);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_strand_the_fetch() {
        let store = Arc::new(GatedStore {
            inner: InMemoryStore::new().with_place(COLLECTION, "library", "Biblioteca", "", 1.0, 2.0),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver_over(store.clone());

        let gave_up =
            tokio::time::timeout(Duration::from_millis(10), resolver.resolve("library")).await;
        assert!(gave_up.is_err());
        assert_eq!(resolver.in_flight_count(), 1);

        store.gate.add_permits(1);
        for _ in 0..100 {
            if resolver.in_flight_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(resolver.in_flight_count(), 0);
        assert_eq!(resolver.cached_count(), 1);

        let record = resolver.resolve("library").await;
        assert_eq!(record.title, "Biblioteca");
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_falls_back() {
        let store = Arc::new(GatedStore {
            inner: InMemoryStore::new(),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let resolver = ContentResolver::new(
            store,
            ResolverConfig {
                fetch_timeout_secs: Some(5),
                ..ResolverConfig::default()
            },
        );

        let record = resolver.resolve("slow").await;

        assert_eq!(record, ContentRecord::fetch_failed("slow"));
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn clear_cache_forces_refetch() {
        let store = seeded();
        let resolver = resolver_over(store.clone());

        resolver.resolve("library").await;
        resolver.clear_cache();
        assert_eq!(resolver.cached_count(), 0);
        resolver.resolve("library").await;

        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn destinations_are_sorted_by_title() {
        let store = Arc::new(
            InMemoryStore::new()
                .with_place(COLLECTION, "z", "Auditorio", "", 1.0, 1.0)
                .with_place(COLLECTION, "a", "Cafetería", "", 2.0, 2.0)
                .with_place(COLLECTION, "m", "Biblioteca", "", 3.0, 3.0),
        );
        let resolver = resolver_over(store);

        let titles: Vec<_> = resolver
            .list_destinations()
            .await
            .into_iter()
            .map(|e| e.record.title)
            .collect();

        assert_eq!(titles, ["Auditorio", "Biblioteca", "Cafetería"]);
    }

    #[tokio::test]
    async fn destination_listing_errors_degrade_to_empty() {
        let resolver = resolver_over(Arc::new(BrokenStore));
        assert!(resolver.list_destinations().await.is_empty());
    }
}
