//! # QR Generator Offline Worker
//!
//! Request-interception worker that keeps the QR generator usable offline.
//!
//! ## Features
//!
//! - **Lifecycle**: install seeds a versioned cache generation, activate
//!   garbage-collects stale generations and claims open clients
//! - **Fetch Interception**: cache-first, then network with best-effort
//!   cache population, then offline fallback
//! - **Cacheability**: closed allow-list of static assets and trusted hosts
//! - **Control Channel**: `SKIP_WAITING` messages from the page
//! - **Background Sync / Push**: deferred QR renders and update notifications
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     ├── LifecycleManager ──┐
//!     ├── InterceptionPolicy ├── CacheStorage (generations)
//!     │       └── Classifier │       └── Cache: RequestKey → CacheEntry
//!     ├── SyncQueue          └── Fetcher (network)
//!     └── Clients
//! ```

use qrgen_core::QrGenError;
use qrgen_net::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub mod cache;
pub mod classify;
pub mod clients;
pub mod control;
pub mod lifecycle;
pub mod policy;
pub mod push;
pub mod sync;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, MemoryCacheStorage, RequestKey};
pub use classify::{CacheRule, Classifier, RuleKind, Verdict};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use control::ControlMessage;
pub use lifecycle::{ActivateReport, InstallReport, LifecycleManager};
pub use policy::{FetchOutcome, InterceptionPolicy};
pub use push::{Notification, NotificationAction, NotificationOptions, PushPayload};
pub use sync::{SyncQueue, SyncReport, QR_GENERATION_TAG};
pub use worker::OfflineWorker;

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] QrGenError),
}

// ==================== Types ====================

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Created, no lifecycle event run yet.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
        };
        f.write_str(s)
    }
}

/// Events published to the host runtime.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Lifecycle state changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// The worker asked to skip the waiting phase.
    SkipWaiting { worker_id: ServiceWorkerId },
    /// A stale generation was removed.
    GenerationDeleted { name: String },
    /// Open clients are now controlled by this worker.
    ClientsClaimed {
        worker_id: ServiceWorkerId,
        count: usize,
    },
    /// A notification should be displayed.
    ShowNotification(Notification),
    /// A window was opened in response to a notification click.
    WindowOpened { client_id: String, url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids_are_unique() {
        let a = ServiceWorkerId::new();
        let b = ServiceWorkerId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("sw-"));
    }

    #[test]
    fn test_state_display_and_default() {
        assert_eq!(ServiceWorkerState::default(), ServiceWorkerState::Parsed);
        assert_eq!(ServiceWorkerState::Activating.to_string(), "activating");
        assert_eq!(
            serde_json::to_value(ServiceWorkerState::Installed).unwrap(),
            serde_json::json!("installed")
        );
    }

    #[test]
    fn test_error_from_net() {
        let err: ServiceWorkerError = NetError::RequestFailed("offline".into()).into();
        assert!(err.to_string().contains("offline"));
    }
}
