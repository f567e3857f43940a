//! Cache generations and the storage that holds them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use qrgen_net::{NetError, Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::ServiceWorkerError;

// ==================== Keys & Entries ====================

/// Identity of a stored request: method plus URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        Self {
            method: method.as_str().to_string(),
            url: url.as_str().to_string(),
        }
    }

    /// Key for a GET of the given URL.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

/// An immutable snapshot of a response taken when it was cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Response URL.
    pub url: Url,
    /// Request method.
    pub method: String,
    /// Response status.
    pub status: u16,
    /// Response type at capture time.
    pub response_type: ResponseType,
    /// Response headers as raw bytes, in received order.
    pub headers: Vec<(String, Vec<u8>)>,
    /// Response body.
    pub body: Vec<u8>,
    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response that the caller will keep using.
    ///
    /// The body is buffered and copied; `response` stays readable.
    pub async fn capture(request: &Request, response: &mut Response) -> Result<Self, NetError> {
        let body = response.tee().await?;
        Ok(Self::build(request, response, body))
    }

    /// Snapshot a response nobody else needs, consuming it.
    pub async fn from_response(request: &Request, mut response: Response) -> Result<Self, NetError> {
        let body = response.tee().await?;
        Ok(Self::build(request, &response, body))
    }

    fn build(request: &Request, response: &Response, body: Bytes) -> Self {
        Self {
            url: response.url.clone(),
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            response_type: response.response_type,
            headers: snapshot_headers(&response.headers),
            body: body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a live response from the snapshot.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                headers.append(n, v);
            }
        }
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        Response::new(
            self.url.clone(),
            status,
            headers,
            self.response_type,
            Bytes::from(self.body.clone()),
        )
    }
}

fn snapshot_headers(headers: &HeaderMap) -> Vec<(String, Vec<u8>)> {
    headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect()
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Cache ====================

/// One cache generation.
#[derive(Debug, Default)]
pub struct Cache {
    /// Generation name.
    pub name: String,
    /// Creation order within the storage.
    seq: u64,
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        Self {
            name: name.to_string(),
            seq: SEQ.fetch_add(1, Ordering::Relaxed),
            entries: HashMap::new(),
        }
    }

    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry, overwriting any previous one for the key.
    pub fn put(&mut self, key: RequestKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Named cache generations (the `caches` global).
///
/// Each call is atomic on its own; callers never hold a lock across calls.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError>;

    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Delete a generation. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Generation names in creation order.
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError>;

    /// Store an entry in a generation, creating the generation if absent.
    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> Result<(), ServiceWorkerError>;

    /// Look a request up in one generation.
    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError>;

    /// Look a request up across all generations, oldest first.
    async fn match_request(&self, key: &RequestKey)
        -> Result<Option<CacheEntry>, ServiceWorkerError>;

    /// Request keys stored in a generation.
    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, ServiceWorkerError>;
}

/// In-process [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered(caches: &HashMap<String, Cache>) -> Vec<&Cache> {
        let mut all: Vec<&Cache> = caches.values().collect();
        all.sort_by_key(|c| c.seq);
        all
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError> {
        let mut caches = self.caches.write().await;
        if !caches.contains_key(name) {
            debug!(cache = name, "Creating cache generation");
            caches.insert(name.to_string(), Cache::new(name));
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let caches = self.caches.read().await;
        Ok(Self::ordered(&caches)
            .into_iter()
            .map(|c| c.name.clone())
            .collect())
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> Result<(), ServiceWorkerError> {
        trace!(cache = name, url = %key.url, "Storing cache entry");
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
            .put(key, entry);
        Ok(())
    }

    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .and_then(|c| c.match_request(key))
            .cloned())
    }

    async fn match_request(
        &self,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        let caches = self.caches.read().await;
        Ok(Self::ordered(&caches)
            .into_iter()
            .find_map(|c| c.match_request(key))
            .cloned())
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, ServiceWorkerError> {
        let caches = self.caches.read().await;
        caches
            .get(name)
            .map(|c| c.keys().into_iter().cloned().collect())
            .ok_or_else(|| ServiceWorkerError::NotFound(name.to_string()))
    }
}
