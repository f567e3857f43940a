//! The worker as seen by its host runtime.
//!
//! The host owns the event loop and calls one method per platform event;
//! every method settles all work it starts before returning.

use std::sync::Arc;

use futures::future::join_all;
use qrgen_core::WorkerConfig;
use qrgen_net::{Fetcher, Request};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::cache::{now_millis, CacheStorage};
use crate::clients::{Client, Clients};
use crate::control::ControlMessage;
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleManager};
use crate::policy::{FetchOutcome, InterceptionPolicy};
use crate::push::{Notification, EXPLORE_ACTION};
use crate::sync::{SyncQueue, SyncReport, QR_GENERATION_TAG};
use crate::{ServiceWorkerError, ServiceWorkerId, ServiceWorkerState, WorkerEvent};

/// Offline worker for the QR generator.
pub struct OfflineWorker {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    lifecycle: LifecycleManager,
    policy: InterceptionPolicy,
    clients: Arc<RwLock<Clients>>,
    sync_queue: SyncQueue,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl OfflineWorker {
    /// Create a worker for the given configuration.
    ///
    /// Returns the worker and the receiving end of its event channel.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let config = Arc::new(config);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let id = ServiceWorkerId::new();
        let clients = Arc::new(RwLock::new(Clients::new()));

        let lifecycle = LifecycleManager::new(
            id,
            config.cache_name(),
            config.manifest_urls()?,
            config.own_origin(),
            Arc::clone(&storage),
            Arc::clone(&fetcher),
            Arc::clone(&clients),
            event_tx.clone(),
        );
        let policy = InterceptionPolicy::new(Arc::clone(&config), storage, fetcher)?;

        info!(worker_id = %id, cache = %config.cache_name(), "Offline worker created");

        Ok((
            Self {
                id,
                config,
                lifecycle,
                policy,
                clients,
                sync_queue: SyncQueue::new(),
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        self.lifecycle.cache_name()
    }

    pub async fn state(&self) -> ServiceWorkerState {
        self.lifecycle.state().await
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.lifecycle.skip_waiting_requested()
    }

    /// Shared handle to the clients registry.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    pub fn policy(&self) -> &InterceptionPolicy {
        &self.policy
    }

    /// `install` event.
    #[instrument(skip(self), fields(worker_id = %self.id))]
    pub async fn install(&self) -> InstallReport {
        let report = self.lifecycle.install().await;
        info!(
            seeded = report.seeded.len(),
            failed = report.failed.len(),
            "Install complete"
        );
        report
    }

    /// `activate` event.
    #[instrument(skip(self), fields(worker_id = %self.id))]
    pub async fn activate(&self) -> ActivateReport {
        let report = self.lifecycle.activate().await;
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            claimed = report.claimed,
            "Activation complete"
        );
        report
    }

    /// `fetch` event.
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        let url = request.url.clone();
        let outcome = self.policy.handle(request).await;
        debug!(url = %url, outcome = outcome.kind(), "Fetch handled");
        outcome
    }

    /// `message` event. Returns the message acted on, if any.
    pub fn handle_message(&self, data: &Value) -> Option<ControlMessage> {
        let message = ControlMessage::parse(data)?;
        match message {
            ControlMessage::SkipWaiting => self.lifecycle.skip_waiting(),
        }
        Some(message)
    }

    /// Queue a QR render request for the next `qr-generation` sync.
    pub async fn defer_qr_request(&self, request: Request) {
        self.sync_queue.enqueue(request).await;
    }

    pub async fn pending_sync(&self) -> usize {
        self.sync_queue.len().await
    }

    /// `sync` event.
    ///
    /// Errors when some deferred requests are still offline, so the platform
    /// schedules another attempt.
    #[instrument(skip(self), fields(worker_id = %self.id))]
    pub async fn handle_sync(&self, tag: &str) -> Result<SyncReport, ServiceWorkerError> {
        let mut report = SyncReport {
            tag: tag.to_string(),
            ..Default::default()
        };
        if tag != QR_GENERATION_TAG {
            debug!(tag, "Ignoring unknown sync tag");
            return Ok(report);
        }

        info!("Handling offline QR generation sync");
        let pending = self.sync_queue.drain().await;
        let outcomes = join_all(
            pending
                .iter()
                .map(|request| self.policy.handle(request.clone())),
        )
        .await;

        let mut retry = Vec::new();
        for (request, outcome) in pending.into_iter().zip(outcomes) {
            match outcome {
                FetchOutcome::PassThrough => report.dropped += 1,
                o if o.is_offline() => retry.push(request),
                _ => report.replayed += 1,
            }
        }

        report.requeued = retry.len();
        if retry.is_empty() {
            return Ok(report);
        }
        self.sync_queue.requeue(retry).await;
        Err(ServiceWorkerError::SyncFailed(format!(
            "{} QR requests still offline",
            report.requeued
        )))
    }

    /// `push` event. Returns the notification shown, if any.
    pub fn handle_push(&self, data: Option<&[u8]>) -> Result<Option<Notification>, ServiceWorkerError> {
        let Some(data) = data else {
            return Ok(None);
        };
        let notification = Notification::from_push_data(data, now_millis())?;
        let _ = self
            .event_tx
            .send(WorkerEvent::ShowNotification(notification.clone()));
        Ok(Some(notification))
    }

    /// `notificationclick` event. Returns the window opened, if any.
    pub async fn handle_notification_click(
        &self,
        action: Option<&str>,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        if action != Some(EXPLORE_ACTION) {
            debug!(?action, "Notification closed");
            return Ok(None);
        }
        let url = self.config.resolve("/")?;
        let client = self.clients.write().await.open_window(url);
        if self
            .event_tx
            .send(WorkerEvent::WindowOpened {
                client_id: client.id.clone(),
                url: client.url.to_string(),
            })
            .is_err()
        {
            warn!("Event receiver dropped; window open not delivered");
        }
        Ok(Some(client))
    }
}
