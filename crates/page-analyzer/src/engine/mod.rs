//! The scan engine: one-shot scans and the continuous runtime session.
//!
//! Raw markup from the host arrives as [`MarkupEvent`]s on an mpsc inbox
//! drained by [`ScanEngine::spawn_inbox`]. One-shot events complete a pending
//! request (see [`oneshot`]); runtime events feed the active session (see
//! [`runtime`]). All engine state sits behind short-lived `std` mutexes that are
//! never held across an `.await`.

mod oneshot;
mod runtime;

use crate::clock::MonotonicClock;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::events::{Subscriber, SubscriptionId, SubscriptionRegistry};
use crate::extract::try_extract;
use crate::host::HostPlatform;
use crate::store::ResultStore;
use crate::types::{MarkupEvent, ScanKind, ScanMeta, ScanRecord, SurfaceId};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use oneshot::PendingScan;
use runtime::RuntimeState;

/// Default one-shot deadline.
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 8000;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a one-shot scan waits for the page to answer after injection.
    pub scan_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_millis(DEFAULT_SCAN_TIMEOUT_MS),
        }
    }
}

impl EngineConfig {
    pub fn with_timeout_ms(ms: u64) -> Self {
        Self {
            scan_timeout: Duration::from_millis(ms),
        }
    }
}

/// Drives scans against a host and records their results.
pub struct ScanEngine {
    host: Arc<dyn HostPlatform>,
    store: Arc<ResultStore>,
    registry: Arc<SubscriptionRegistry>,
    config: EngineConfig,
    clock: MonotonicClock,
    pending: Mutex<HashMap<SurfaceId, PendingScan>>,
    next_request: AtomicU64,
    runtime: Mutex<RuntimeState>,
}

impl ScanEngine {
    pub fn new(
        host: Arc<dyn HostPlatform>,
        store: Arc<ResultStore>,
        registry: Arc<SubscriptionRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            host,
            store,
            registry,
            config,
            clock: MonotonicClock::new(),
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            runtime: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn HostPlatform> {
        &self.host
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.registry.subscribe(subscriber)
    }

    /// Drain `inbox` on a background task until every sender is dropped or
    /// the engine itself is gone.
    pub fn spawn_inbox(self: &Arc<Self>, mut inbox: mpsc::Receiver<MarkupEvent>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = inbox.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.handle_markup(event).await;
            }
            debug!("markup inbox closed");
        })
    }

    /// Route one raw-markup event to the mode that produced it.
    pub async fn handle_markup(&self, event: MarkupEvent) {
        match event.kind {
            ScanKind::OneTime => self.handle_one_time(event).await,
            ScanKind::Runtime => self.handle_runtime(event),
        }
    }

    /// Extract `event` into a record stamped with the receipt time.
    ///
    /// The title is the document's `<title>` when it has one, else the title
    /// the routine reported.
    pub fn build_record(&self, event: &MarkupEvent) -> AnalyzerResult<ScanRecord> {
        if event.markup.trim().is_empty() {
            return Err(AnalyzerError::ExtractionFailure("empty markup".to_string()));
        }
        let summary = try_extract(&event.markup)?;
        let title = Some(summary.head.title.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| event.title.clone());

        Ok(ScanRecord {
            meta: ScanMeta {
                timestamp: self.clock.next(),
                surface_id: event.surface_id.clone(),
                url: event.url.clone(),
                title,
                reported_at: event.timestamp,
            },
            summary,
        })
    }

    fn extract_or_drop(&self, event: &MarkupEvent) -> Option<ScanRecord> {
        match self.build_record(event) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    kind = %event.kind,
                    surface = ?event.surface_id,
                    code = e.code(),
                    "dropping markup event: {e}"
                );
                None
            }
        }
    }

    fn pending_lock(&self) -> MutexGuard<'_, HashMap<SurfaceId, PendingScan>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime_lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
