//! Per-request interception decisions.

use std::sync::Arc;

use http::{Method, StatusCode};
use qrgen_core::WorkerConfig;
use qrgen_net::{Fetcher, Request, Response, ResponseType};
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::classify::Classifier;
use crate::ServiceWorkerError;

/// How an intercepted request was resolved.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the runtime performs its default fetch.
    PassThrough,
    /// Served from a stored snapshot without touching the network.
    CacheHit(Response),
    /// The live network response, possibly stored on the way through.
    Network(Response),
    /// Network failed on a navigation; the cached shell stands in.
    OfflineShell(Response),
    /// Network failed; synthetic plain-text placeholder.
    OfflinePlaceholder(Response),
}

impl FetchOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchOutcome::PassThrough => "pass_through",
            FetchOutcome::CacheHit(_) => "cache_hit",
            FetchOutcome::Network(_) => "network",
            FetchOutcome::OfflineShell(_) => "offline_shell",
            FetchOutcome::OfflinePlaceholder(_) => "offline_placeholder",
        }
    }

    /// Whether the network attempt failed.
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            FetchOutcome::OfflineShell(_) | FetchOutcome::OfflinePlaceholder(_)
        )
    }

    /// The response to hand back, or `None` for pass-through.
    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::PassThrough => None,
            FetchOutcome::CacheHit(r)
            | FetchOutcome::Network(r)
            | FetchOutcome::OfflineShell(r)
            | FetchOutcome::OfflinePlaceholder(r) => Some(r),
        }
    }
}

/// Cache-first interception with network population and offline fallback.
pub struct InterceptionPolicy {
    config: Arc<WorkerConfig>,
    cache_name: String,
    shell: RequestKey,
    classifier: Classifier,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl InterceptionPolicy {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        let shell = RequestKey::get(&config.shell_url()?);
        Ok(Self {
            cache_name: config.cache_name(),
            classifier: Classifier::from_config(&config),
            shell,
            config,
            storage,
            fetcher,
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Whether the worker may intercept requests to this URL.
    pub fn in_scope(&self, url: &Url) -> bool {
        self.config.is_same_origin(url) || self.config.is_trusted_origin(url)
    }

    /// Resolve one intercepted request.
    ///
    /// The cache is always consulted before the network, and the network is
    /// tried at most once.
    pub async fn handle(&self, request: Request) -> FetchOutcome {
        if !self.in_scope(&request.url) {
            trace!(url = %request.url, "Out of scope, passing through");
            return FetchOutcome::PassThrough;
        }

        let key = RequestKey::for_request(&request);
        match self.storage.match_request(&key).await {
            Ok(Some(entry)) => {
                debug!(url = %request.url, "Serving from cache");
                return FetchOutcome::CacheHit(entry.to_response());
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed"),
        }

        match self.fetcher.fetch(request.clone()).await {
            Ok(mut response) => {
                if self.should_store(&request, &response) {
                    self.store(&request, key, &mut response).await;
                }
                FetchOutcome::Network(response)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Fetch failed");
                self.fallback(&request).await
            }
        }
    }

    fn should_store(&self, request: &Request, response: &Response) -> bool {
        response.status == StatusCode::OK
            && response.response_type == ResponseType::Basic
            && request.method == Method::GET
            && self.classifier.is_cacheable(request.url.as_str())
    }

    async fn store(&self, request: &Request, key: RequestKey, response: &mut Response) {
        let entry = match CacheEntry::capture(request, response).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Could not snapshot response");
                return;
            }
        };
        if let Err(e) = self.storage.put(&self.cache_name, key, entry).await {
            warn!(url = %request.url, cache = %self.cache_name, error = %e, "Failed to store response");
        }
    }

    async fn fallback(&self, request: &Request) -> FetchOutcome {
        if request.destination.is_document() {
            match self.storage.match_request(&self.shell).await {
                Ok(Some(entry)) => return FetchOutcome::OfflineShell(entry.to_response()),
                Ok(None) => debug!(shell = %self.shell.url, "Shell document not cached"),
                Err(e) => warn!(error = %e, "Shell lookup failed"),
            }
        }
        FetchOutcome::OfflinePlaceholder(Response::text_plain(
            request.url.clone(),
            StatusCode::OK,
            self.config.offline_body.clone(),
        ))
    }
}
