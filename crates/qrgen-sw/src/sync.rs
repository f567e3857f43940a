//! Background sync of QR renders deferred while offline.

use std::collections::VecDeque;

use qrgen_net::Request;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Sync tag the page registers after a QR render failed offline.
pub const QR_GENERATION_TAG: &str = "qr-generation";

/// Outcome of a sync event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub tag: String,
    /// Requests that completed against the network or cache.
    pub replayed: usize,
    /// Requests dropped because they are outside the worker's scope.
    pub dropped: usize,
    /// Requests put back for the next sync.
    pub requeued: usize,
}

/// FIFO of requests waiting for connectivity.
#[derive(Debug, Default)]
pub struct SyncQueue {
    pending: Mutex<VecDeque<Request>>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, request: Request) {
        debug!(url = %request.url, "Deferring request until sync");
        self.pending.lock().await.push_back(request);
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Take every pending request, oldest first.
    pub async fn drain(&self) -> Vec<Request> {
        self.pending.lock().await.drain(..).collect()
    }

    /// Put requests back at the front, keeping their order.
    pub async fn requeue(&self, requests: Vec<Request>) {
        let mut pending = self.pending.lock().await;
        for request in requests.into_iter().rev() {
            pending.push_front(request);
        }
    }
}
