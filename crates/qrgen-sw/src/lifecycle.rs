//! Install and activate: seeding the current generation and removing stale ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use qrgen_net::{Fetcher, Request};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use url::{Origin, Url};

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::clients::Clients;
use crate::{ServiceWorkerError, ServiceWorkerId, ServiceWorkerState, WorkerEvent};

/// Outcome of an install.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    /// Generation that was opened.
    pub cache_name: String,
    /// Manifest URLs stored.
    pub seeded: Vec<String>,
    /// Manifest URLs that could not be stored, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Outcome of an activation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivateReport {
    /// Generation kept as current.
    pub cache_name: String,
    /// Stale generations removed.
    pub deleted: Vec<String>,
    /// Stale generations whose removal failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Clients newly placed under control.
    pub claimed: usize,
}

/// Owns the current generation's lifecycle.
pub struct LifecycleManager {
    id: ServiceWorkerId,
    cache_name: String,
    manifest: Vec<Url>,
    scope: Origin,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,
    state: RwLock<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ServiceWorkerId,
        cache_name: impl Into<String>,
        manifest: Vec<Url>,
        scope: Origin,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<RwLock<Clients>>,
        event_tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            id,
            cache_name: cache_name.into(),
            manifest,
            scope,
            storage,
            fetcher,
            clients,
            state: RwLock::new(ServiceWorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            event_tx,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Whether skip-waiting has been requested.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    async fn set_state(&self, new_state: ServiceWorkerState) {
        *self.state.write().await = new_state;
        debug!(worker_id = %self.id, state = %new_state, "Worker state changed");
        let _ = self.event_tx.send(WorkerEvent::StateChange {
            worker_id: self.id,
            new_state,
        });
    }

    /// Ask the host to activate this worker without waiting for old clients to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
        info!(worker_id = %self.id, "Skip waiting requested");
        let _ = self.event_tx.send(WorkerEvent::SkipWaiting { worker_id: self.id });
    }

    /// Open the current generation and seed it with the manifest.
    ///
    /// Seeding is best-effort: failures are reported, never returned.
    pub async fn install(&self) -> InstallReport {
        self.set_state(ServiceWorkerState::Installing).await;
        let mut report = InstallReport {
            cache_name: self.cache_name.clone(),
            ..Default::default()
        };

        match self.storage.open(&self.cache_name).await {
            Ok(()) => {
                info!(cache = %self.cache_name, "Opened cache");
                let results = join_all(self.manifest.iter().map(|url| self.seed(url))).await;
                for (url, result) in self.manifest.iter().zip(results) {
                    match result {
                        Ok(()) => report.seeded.push(url.to_string()),
                        Err(e) => {
                            error!(url = %url, error = %e, "Failed to cache resource");
                            report.failed.push((url.to_string(), e.to_string()));
                        }
                    }
                }
            }
            Err(e) => {
                error!(cache = %self.cache_name, error = %e, "Failed to open cache");
                report.failed = self
                    .manifest
                    .iter()
                    .map(|u| (u.to_string(), e.to_string()))
                    .collect();
            }
        }

        self.skip_waiting();
        self.set_state(ServiceWorkerState::Installed).await;
        report
    }

    async fn seed(&self, url: &Url) -> Result<(), ServiceWorkerError> {
        let request = Request::get(url.clone());
        let response = self.fetcher.fetch(request.clone()).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::CacheError(format!(
                "unexpected status {}",
                response.status
            )));
        }
        let entry = CacheEntry::from_response(&request, response).await?;
        self.storage
            .put(&self.cache_name, RequestKey::for_request(&request), entry)
            .await
    }

    /// Delete every generation except the current one, then claim clients.
    ///
    /// Deletions run concurrently; one failing does not stop the others.
    pub async fn activate(&self) -> ActivateReport {
        self.set_state(ServiceWorkerState::Activating).await;
        let mut report = ActivateReport {
            cache_name: self.cache_name.clone(),
            ..Default::default()
        };

        match self.storage.keys().await {
            Ok(names) => {
                let stale: Vec<String> = names
                    .into_iter()
                    .filter(|name| *name != self.cache_name)
                    .collect();
                let results = join_all(stale.iter().map(|name| {
                    info!(cache = %name, "Deleting old cache");
                    self.storage.delete(name)
                }))
                .await;

                for (name, result) in stale.into_iter().zip(results) {
                    match result {
                        Ok(_) => {
                            let _ = self
                                .event_tx
                                .send(WorkerEvent::GenerationDeleted { name: name.clone() });
                            report.deleted.push(name);
                        }
                        Err(e) => {
                            warn!(cache = %name, error = %e, "Failed to delete old cache");
                            report.failed.push((name, e.to_string()));
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to enumerate caches"),
        }

        report.claimed = self.claim_clients().await;
        self.set_state(ServiceWorkerState::Activated).await;
        report
    }

    async fn claim_clients(&self) -> usize {
        let count = self.clients.write().await.claim(self.id, &self.scope);
        debug!(worker_id = %self.id, count, "Claimed clients");
        let _ = self.event_tx.send(WorkerEvent::ClientsClaimed {
            worker_id: self.id,
            count,
        });
        count
    }
}
