//! Event fan-out: the subscriber registry and the broadcast event bus.
//!
//! The engine emits every [`AnalyzerEvent`] through a [`SubscriptionRegistry`].
//! Each registered [`Subscriber`] gets the event on its matching hook. A
//! [`BusSubscriber`] forwards events onto an [`EventBus`], a
//! `tokio::sync::broadcast` channel any number of external consumers (socket
//! connections, log sinks) can subscribe to. With no receivers, events are
//! dropped.

use crate::types::{RuntimeTotals, StoredRun, StructuralSummary, SurfaceId};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::warn;

/// Every event the engine emits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AnalyzerEvent {
    /// A one-shot scan finished.
    ScanComplete {
        surface_id: SurfaceId,
        summary: StructuralSummary,
    },
    /// A one-shot scan failed.
    ScanError { surface_id: SurfaceId, reason: String },
    /// Runtime progress. `origin` is `None` for the initial update.
    RuntimeUpdate {
        origin: Option<String>,
        totals: RuntimeTotals,
    },
    /// A runtime session was stopped and persisted.
    RuntimeComplete { run: StoredRun },
}

/// Receives engine events. Every hook defaults to a no-op.
pub trait Subscriber: Send + Sync {
    fn on_update(&self, _origin: Option<&str>, _totals: &RuntimeTotals) {}

    fn on_complete(&self, _run: &StoredRun) {}

    fn on_scan_complete(&self, _surface_id: &SurfaceId, _summary: &StructuralSummary) {}

    fn on_scan_error(&self, _surface_id: &SurfaceId, _reason: &str) {}

    /// Route an event to its hook.
    fn on_event(&self, event: &AnalyzerEvent) {
        match event {
            AnalyzerEvent::ScanComplete { surface_id, summary } => {
                self.on_scan_complete(surface_id, summary)
            }
            AnalyzerEvent::ScanError { surface_id, reason } => {
                self.on_scan_error(surface_id, reason)
            }
            AnalyzerEvent::RuntimeUpdate { origin, totals } => {
                self.on_update(origin.as_deref(), totals)
            }
            AnalyzerEvent::RuntimeComplete { run } => self.on_complete(run),
        }
    }
}

/// Handle returned by [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Entry = (SubscriptionId, Arc<dyn Subscriber>);

/// The set of subscribers events are fanned out to.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Registering the same `Arc` again returns its
    /// existing id.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let ptr = Arc::as_ptr(&subscriber) as *const ();
        if let Some((id, _)) = entries
            .iter()
            .find(|(_, s)| Arc::as_ptr(s) as *const () == ptr)
        {
            return *id;
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push((id, subscriber));
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(sid, _)| *sid != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every subscriber registered at the time of the call.
    ///
    /// A panicking subscriber is logged and skipped.
    pub fn emit(&self, event: &AnalyzerEvent) {
        let snapshot: Vec<Entry> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (id, subscriber) in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event)));
            if result.is_err() {
                warn!(subscription = id.0, "subscriber panicked while handling event");
            }
        }
    }
}

/// Broadcast channel of serializable events for external consumers.
pub struct EventBus {
    sender: broadcast::Sender<AnalyzerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all receivers. Dropped if there are none.
    pub fn emit(&self, event: AnalyzerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalyzerEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Forwards registry events onto an [`EventBus`].
pub struct BusSubscriber {
    bus: Arc<EventBus>,
}

impl BusSubscriber {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl Subscriber for BusSubscriber {
    fn on_event(&self, event: &AnalyzerEvent) {
        self.bus.emit(event.clone());
    }
}
