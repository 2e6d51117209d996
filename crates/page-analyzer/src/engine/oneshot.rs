//! One-shot mode: scan a single surface once.
//!
//! A request registers a [`PendingScan`] for its surface before it awaits
//! anything, then injects the one-time routine and waits on a oneshot channel
//! under the configured timeout. The first matching markup event takes the
//! sender out of the pending map, so duplicates cannot complete a request
//! twice.

use super::ScanEngine;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::events::AnalyzerEvent;
use crate::types::{MarkupEvent, ScanKind, ScanRecord, SurfaceId};
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::oneshot as channel;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub(super) struct PendingScan {
    request: u64,
    tx: channel::Sender<ScanRecord>,
}

/// Clears the pending entry of one request when the request ends, whichever
/// way it ends. Holds the engine by reference or by `Arc`.
struct PendingGuard<E: Deref<Target = ScanEngine>> {
    engine: E,
    surface_id: SurfaceId,
    request: u64,
}

impl<E: Deref<Target = ScanEngine>> Drop for PendingGuard<E> {
    fn drop(&mut self) {
        let mut pending = self.engine.pending_lock();
        if pending
            .get(&self.surface_id)
            .is_some_and(|p| p.request == self.request)
        {
            pending.remove(&self.surface_id);
        }
    }
}

impl ScanEngine {
    /// Scan `surface_id` once and return the record.
    ///
    /// Subscribers see `scanComplete` or `scanError` for the request. A
    /// request rejected with [`AnalyzerError::ScanPending`] emits nothing: the
    /// scan already in flight reports for that surface.
    pub async fn scan_once(&self, surface_id: &SurfaceId) -> AnalyzerResult<ScanRecord> {
        let (rx, request) = self.register_pending(surface_id)?;
        let guard = PendingGuard {
            engine: self,
            surface_id: surface_id.clone(),
            request,
        };
        let result = self.run_one_shot(surface_id, rx, guard).await;
        self.report_one_shot(surface_id, &result);
        result
    }

    /// Reserve `surface_id` and run the scan on a background task.
    ///
    /// Fails with [`AnalyzerError::ScanPending`] before anything is spawned if
    /// a request already waits on the surface; otherwise the outcome is
    /// reported to subscribers as with [`ScanEngine::scan_once`]. Must be
    /// called from within a tokio runtime.
    pub fn start_scan(
        self: &Arc<Self>,
        surface_id: &SurfaceId,
    ) -> AnalyzerResult<JoinHandle<AnalyzerResult<ScanRecord>>> {
        let (rx, request) = self.register_pending(surface_id)?;
        let guard = PendingGuard {
            engine: Arc::clone(self),
            surface_id: surface_id.clone(),
            request,
        };
        let engine = Arc::clone(self);
        let surface_id = surface_id.clone();
        Ok(tokio::spawn(async move {
            let result = engine.run_one_shot(&surface_id, rx, guard).await;
            engine.report_one_shot(&surface_id, &result);
            result
        }))
    }

    /// Whether a one-shot request is waiting on `surface_id`.
    pub fn is_scan_pending(&self, surface_id: &SurfaceId) -> bool {
        self.pending_lock().contains_key(surface_id)
    }

    fn report_one_shot(&self, surface_id: &SurfaceId, result: &AnalyzerResult<ScanRecord>) {
        match result {
            Ok(record) => {
                info!(surface = %surface_id, "one-shot scan complete");
                self.registry.emit(&AnalyzerEvent::ScanComplete {
                    surface_id: surface_id.clone(),
                    summary: record.summary.clone(),
                });
            }
            Err(e) => {
                warn!(surface = %surface_id, code = e.code(), "one-shot scan failed: {e}");
                self.registry.emit(&AnalyzerEvent::ScanError {
                    surface_id: surface_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Inject and wait. `_guard` keeps the reservation until this returns.
    async fn run_one_shot<E: Deref<Target = ScanEngine>>(
        &self,
        surface_id: &SurfaceId,
        rx: channel::Receiver<ScanRecord>,
        _guard: PendingGuard<E>,
    ) -> AnalyzerResult<ScanRecord> {
        let surface = self.host.surface(surface_id).await.ok_or_else(|| {
            AnalyzerError::InjectionDenied(format!("surface {surface_id} is not open"))
        })?;
        if !surface.is_injectable() {
            return Err(AnalyzerError::InjectionDenied(format!(
                "{} is not a retrievable address",
                surface.url
            )));
        }

        self.host
            .inject(surface_id, ScanKind::OneTime, None)
            .await
            .map_err(|e| AnalyzerError::InjectionDenied(e.to_string()))?;
        debug!(surface = %surface_id, "one-time routine injected");

        let deadline = self.config.scan_timeout;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(_)) | Err(_) => Err(AnalyzerError::ScanTimeout(deadline.as_millis() as u64)),
        }
    }

    /// Claim the pending slot of `surface_id` for a new request.
    fn register_pending(
        &self,
        surface_id: &SurfaceId,
    ) -> AnalyzerResult<(channel::Receiver<ScanRecord>, u64)> {
        let mut pending = self.pending_lock();
        if pending.contains_key(surface_id) {
            debug!(surface = %surface_id, "one-shot request already pending");
            return Err(AnalyzerError::ScanPending(surface_id.clone()));
        }
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::channel();
        pending.insert(surface_id.clone(), PendingScan { request, tx });
        Ok((rx, request))
    }

    /// Persist a one-time event and hand it to the request waiting on its
    /// surface, if any.
    pub(super) async fn handle_one_time(&self, event: MarkupEvent) {
        let Some(record) = self.extract_or_drop(&event) else {
            return;
        };

        self.store.put_scan(&record).await;
        self.store.set_session_global(&record).await;
        let Some(surface_id) = event.surface_id else {
            debug!("one-time event without surface id stored but not delivered");
            return;
        };
        self.store
            .update_session_per_surface(&surface_id, &record)
            .await;

        let waiting = self.pending_lock().remove(&surface_id);
        match waiting {
            Some(pending) => {
                if pending.tx.send(record).is_err() {
                    debug!(surface = %surface_id, "one-shot request ended before delivery");
                }
            }
            None => debug!(surface = %surface_id, "no one-shot request waiting"),
        }
    }
}
