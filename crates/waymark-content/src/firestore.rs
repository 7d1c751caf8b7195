//! [`FirestoreStore`] – Cloud Firestore REST v1 client.
//!
//! Reads documents through the public REST surface:
//!
//! ```text
//! GET {base}/v1/projects/{project}/databases/(default)/documents/{collection}/{id}?key=…
//! GET {base}/v1/projects/{project}/databases/(default)/documents/{collection}?pageSize=…&pageToken=…
//! ```
//!
//! Field values arrive wrapped in a type tag (`{"stringValue": "…"}`,
//! `{"integerValue": "42"}` – integers are transported as strings).  Only
//! scalar tags are decoded; nested maps, arrays, timestamps and references are
//! skipped.
//!
//! # Example
//!
//! ```rust,no_run
//! use waymark_content::{DocumentStore, FirestoreStore};
//!
//! # async fn demo() {
//! let store = FirestoreStore::new("my-campus-project", Some("AIza…".into()));
//! let doc = store.get_document("buildingLocations", "library").await;
//! # }
//! ```

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::store::{Document, DocumentStore, FieldValue, StoreError};

/// Public Firestore endpoint.  Override with
/// [`FirestoreStore::with_base_url`] to target the local emulator.
pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com";

/// Documents requested per listing page.
const PAGE_SIZE: u32 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Value>,
    next_page_token: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// FirestoreStore
// ─────────────────────────────────────────────────────────────────────────────

/// A [`DocumentStore`] backed by a Firestore project.
///
/// Construct once and share; the inner [`reqwest::Client`] pools connections.
pub struct FirestoreStore {
    base_url: String,
    project_id: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for FirestoreStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreStore")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl FirestoreStore {
    pub fn new(project_id: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: project_id.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at a different host, e.g. `http://localhost:8080`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Build the REST URL for `segments` below the database's `documents`
    /// root.  Segments are percent-encoded individually.
    fn documents_url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoreError::Transport(format!("invalid base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| StoreError::Transport(format!("base URL {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend([
                "v1",
                "projects",
                self.project_id.as_str(),
                "databases",
                "(default)",
                "documents",
            ])
            .extend(segments);
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    async fn fetch(&self, url: Url) -> Result<(StatusCode, String), StoreError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok((status, body))
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    #[instrument(skip(self), fields(project = %self.project_id))]
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let url = self.documents_url(&[collection, id])?;
        let (status, body) = self.fetch(url).await?;

        if status == StatusCode::NOT_FOUND {
            debug!("document does not exist");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body));
        }

        let raw: Value =
            serde_json::from_str(&body).map_err(|e| StoreError::Malformed(e.to_string()))?;
        decode_document(&raw).map(Some)
    }

    #[instrument(skip(self), fields(project = %self.project_id))]
    async fn list_documents(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.documents_url(&[collection])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &PAGE_SIZE.to_string());
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let (status, body) = self.fetch(url).await?;
            if status == StatusCode::NOT_FOUND {
                break;
            }
            if !status.is_success() {
                return Err(classify_error(status.as_u16(), &body));
            }

            let page: ListResponse =
                serde_json::from_str(&body).map_err(|e| StoreError::Malformed(e.to_string()))?;
            for raw in &page.documents {
                let id = raw
                    .get("name")
                    .and_then(Value::as_str)
                    .and_then(document_id_from_name)
                    .ok_or_else(|| StoreError::Malformed("document without a name".into()))?;
                out.push((id.to_string(), decode_document(raw)?));
            }
            debug!(page_documents = page.documents.len(), total = out.len(), "listed page");

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Map a non-success response onto a [`StoreError`].
pub fn classify_error(code: u16, body: &str) -> StoreError {
    let (message, status) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.status),
        Err(_) => (body.trim().to_string(), String::new()),
    };
    if code == 403 || status == "PERMISSION_DENIED" {
        StoreError::PermissionDenied(message)
    } else {
        StoreError::Status { code, message }
    }
}

/// Decode the `fields` object of a Firestore document resource.
///
/// A document with no `fields` key is valid and decodes to an empty map.
pub fn decode_document(raw: &Value) -> Result<Document, StoreError> {
    let Some(fields) = raw.get("fields") else {
        return Ok(Document::new());
    };
    let fields = fields
        .as_object()
        .ok_or_else(|| StoreError::Malformed("`fields` is not an object".into()))?;

    let mut doc = Document::with_capacity(fields.len());
    for (name, value) in fields {
        if let Some(decoded) = decode_value(value)? {
            doc.insert(name.clone(), decoded);
        }
    }
    Ok(doc)
}

/// Decode one typed value.  `Ok(None)` for tags this store does not model.
fn decode_value(value: &Value) -> Result<Option<FieldValue>, StoreError> {
    let Some(object) = value.as_object() else {
        return Err(StoreError::Malformed(format!("field value is not an object: {value}")));
    };

    if let Some(s) = object.get("stringValue") {
        let s = s
            .as_str()
            .ok_or_else(|| StoreError::Malformed("stringValue is not a string".into()))?;
        return Ok(Some(FieldValue::String(s.to_string())));
    }
    if let Some(v) = object.get("doubleValue") {
        // NaN and infinities arrive as strings.
        let v = match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| StoreError::Malformed(format!("bad doubleValue: {v}")))?;
        return Ok(Some(FieldValue::Double(v)));
    }
    if let Some(v) = object.get("integerValue") {
        let v = match v {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
        .ok_or_else(|| StoreError::Malformed(format!("bad integerValue: {v}")))?;
        return Ok(Some(FieldValue::Integer(v)));
    }
    if let Some(v) = object.get("booleanValue") {
        let v = v
            .as_bool()
            .ok_or_else(|| StoreError::Malformed("booleanValue is not a bool".into()))?;
        return Ok(Some(FieldValue::Boolean(v)));
    }
    if object.contains_key("nullValue") {
        return Ok(Some(FieldValue::Null));
    }
    Ok(None)
}

/// `projects/p/databases/(default)/documents/col/abc` → `abc`.
fn document_id_from_name(name: &str) -> Option<&str> {
    name.rsplit('/').next().filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP server answering one connection per canned `(status, body)`
    /// in order.  Returns its base URL and the request lines it received.
    async fn canned_server(responses: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let head = String::from_utf8_lossy(&request);
                log.lock()
                    .unwrap()
                    .push(head.lines().next().unwrap_or_default().to_string());

                let reply = format!(
                    "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        (base, seen)
    }

    /// Store pointed at `base`, bypassing any proxy set in the environment.
    fn local_store(base: String, api_key: Option<&str>) -> FirestoreStore {
        let mut store = FirestoreStore::new("campus", api_key.map(str::to_string)).with_base_url(base);
        store.client = reqwest::Client::builder().no_proxy().build().unwrap();
        store
    }

    fn place(id: &str, title: &str) -> Value {
        json!({
            "name": format!("projects/campus/databases/(default)/documents/buildingLocations/{id}"),
            "fields": {
                "name": { "stringValue": title },
                "latitude": { "doubleValue": 13.72 }
            }
        })
    }

    #[test]
    fn decodes_scalar_fields() {
        let raw = json!({
            "name": "projects/p/databases/(default)/documents/buildingLocations/lib",
            "fields": {
                "name": { "stringValue": "Biblioteca" },
                "latitude": { "doubleValue": 13.7200 },
                "longitude": { "integerValue": "-89" },
                "open": { "booleanValue": true },
                "notes": { "nullValue": null },
                "tags": { "arrayValue": { "values": [] } }
            }
        });

        let doc = decode_document(&raw).unwrap();
        assert_eq!(doc["name"], FieldValue::String("Biblioteca".into()));
        assert_eq!(doc["latitude"].as_f64(), Some(13.72));
        assert_eq!(doc["longitude"], FieldValue::Integer(-89));
        assert_eq!(doc["open"], FieldValue::Boolean(true));
        assert_eq!(doc["notes"], FieldValue::Null);
        assert!(!doc.contains_key("tags"));
    }

    #[test]
    fn document_without_fields_is_empty() {
        let doc = decode_document(&json!({ "name": "x" })).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let raw = json!({ "fields": { "n": { "integerValue": "twelve" } } });
        assert!(matches!(decode_document(&raw), Err(StoreError::Malformed(_))));

        let raw = json!({ "fields": { "n": 12 } });
        assert!(matches!(decode_document(&raw), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn permission_denied_is_classified() {
        let body = r#"{"error":{"code":403,"message":"Missing or insufficient permissions.","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(
            classify_error(403, body),
            StoreError::PermissionDenied("Missing or insufficient permissions.".into())
        );
        // Some proxies answer 401 but keep the status string.
        let body = r#"{"error":{"code":401,"message":"nope","status":"PERMISSION_DENIED"}}"#;
        assert!(matches!(classify_error(401, body), StoreError::PermissionDenied(_)));
    }

    #[test]
    fn other_statuses_keep_code_and_message() {
        assert_eq!(
            classify_error(503, "upstream unavailable\n"),
            StoreError::Status {
                code: 503,
                message: "upstream unavailable".into()
            }
        );
    }

    #[test]
    fn document_url_encodes_segments_and_key() {
        let store = FirestoreStore::new("campus", Some("k3y".into()))
            .with_base_url("http://localhost:8080/");
        let url = store.documents_url(&["buildingLocations", "edificio A"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/projects/campus/databases/(default)/documents/buildingLocations/edificio%20A?key=k3y"
        );
    }

    #[test]
    fn document_ids_come_from_resource_names() {
        assert_eq!(
            document_id_from_name("projects/p/databases/(default)/documents/c/abc"),
            Some("abc")
        );
        assert_eq!(document_id_from_name("trailing/"), None);
    }

    #[tokio::test]
    async fn missing_document_is_none_and_present_one_decodes() {
        let not_found = json!({
            "error": { "code": 404, "message": "Document not found", "status": "NOT_FOUND" }
        });
        let (base, seen) = canned_server(vec![
            (404, not_found.to_string()),
            (200, place("lib", "Biblioteca").to_string()),
        ])
        .await;
        let store = local_store(base, Some("k3y"));

        let missing = store.get_document("buildingLocations", "nope").await.unwrap();
        assert!(missing.is_none());

        let doc = store
            .get_document("buildingLocations", "lib")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["name"].as_str(), Some("Biblioteca"));

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            "GET /v1/projects/campus/databases/(default)/documents/buildingLocations/nope?key=k3y HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn forbidden_read_is_permission_denied() {
        let body = json!({
            "error": { "code": 403, "message": "Missing or insufficient permissions.", "status": "PERMISSION_DENIED" }
        });
        let (base, _) = canned_server(vec![(403, body.to_string())]).await;
        let store = local_store(base, None);

        let err = store.get_document("buildingLocations", "lib").await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn listing_follows_page_tokens() {
        let first = json!({ "documents": [place("a", "Auditorio")], "nextPageToken": "tok-2" });
        let second = json!({ "documents": [place("b", "Biblioteca")] });
        let (base, seen) =
            canned_server(vec![(200, first.to_string()), (200, second.to_string())]).await;
        let store = local_store(base, None);

        let docs = store.list_documents("buildingLocations").await.unwrap();
        let ids: Vec<_> = docs.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(docs[1].1["name"].as_str(), Some("Biblioteca"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("pageSize=300"));
        assert!(!seen[0].contains("pageToken"));
        assert!(seen[1].contains("pageToken=tok-2"));
    }

    #[tokio::test]
    async fn listing_a_missing_collection_is_empty() {
        let (base, _) = canned_server(vec![(404, "{}".to_string())]).await;
        let store = local_store(base, None);
        assert!(store.list_documents("nothing").await.unwrap().is_empty());
    }

    #[test]
    fn debug_redacts_api_key() {
        let store = FirestoreStore::new("campus", Some("super-secret".into()));
        let rendered = format!("{store:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
