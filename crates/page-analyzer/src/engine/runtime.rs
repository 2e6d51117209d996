//! Continuous mode: scan every page as it finishes loading.
//!
//! `start_runtime` opens a [`RuntimeSession`] and spawns a watcher task that
//! first injects into every open surface and then follows the host's load
//! notifications. Each session gets a new generation number. The watcher
//! stops injecting as soon as its generation is no longer the active one, and
//! routine output tagged with an older generation is discarded.

use super::ScanEngine;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::events::AnalyzerEvent;
use crate::host::Surface;
use crate::types::{
    MarkupEvent, RuntimeRun, RuntimeTotals, ScanKind, ScanRecord, ScanStatus, StoredRun,
    UNKNOWN_ORIGIN,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The in-memory accumulation of an active runtime scan.
#[derive(Debug)]
pub(super) struct RuntimeSession {
    started_at: i64,
    total_scans: usize,
    dataset: BTreeMap<String, Vec<ScanRecord>>,
}

impl RuntimeSession {
    fn new(started_at: i64) -> Self {
        Self {
            started_at,
            total_scans: 0,
            dataset: BTreeMap::new(),
        }
    }

    fn append(&mut self, origin: String, record: ScanRecord) -> RuntimeTotals {
        self.dataset.entry(origin).or_default().push(record);
        self.total_scans += 1;
        self.totals()
    }

    fn totals(&self) -> RuntimeTotals {
        RuntimeTotals {
            total_scans: self.total_scans,
            pages_count: self.dataset.len(),
            started_at: self.started_at,
        }
    }

    fn finalize(self, stopped_at: i64) -> RuntimeRun {
        RuntimeRun {
            started_at: self.started_at,
            stopped_at,
            total_scans: self.total_scans,
            pages_count: self.dataset.len(),
            dataset: self.dataset,
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct RuntimeState {
    session: Option<RuntimeSession>,
    watcher: Option<JoinHandle<()>>,
    generation: u64,
}

impl ScanEngine {
    /// Begin a runtime session. Returns `false` if one is already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_runtime(self: &Arc<Self>) -> bool {
        let loads = match self.host.watch_loads() {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!("page loads will not trigger scans: {e}");
                None
            }
        };

        let totals = {
            let mut state = self.runtime_lock();
            if state.session.is_some() {
                debug!("runtime scan already active");
                return false;
            }
            state.generation += 1;
            let generation = state.generation;
            let session = RuntimeSession::new(self.clock.next());
            let totals = session.totals();
            state.session = Some(session);
            state.watcher = Some(tokio::spawn(watch_surfaces(
                Arc::downgrade(self),
                generation,
                loads,
            )));
            totals
        };

        info!(started_at = totals.started_at, "runtime scan started");
        self.registry.emit(&AnalyzerEvent::RuntimeUpdate {
            origin: None,
            totals,
        });
        true
    }

    /// End the active session, persist it and return it.
    pub async fn stop_runtime(&self) -> AnalyzerResult<StoredRun> {
        let (session, watcher) = {
            let mut state = self.runtime_lock();
            let session = state.session.take().ok_or(AnalyzerError::RuntimeInactive)?;
            (session, state.watcher.take())
        };
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        let run = session.finalize(self.clock.next());
        let key = self.store.put_run(&run).await;
        info!(
            key = %key,
            total_scans = run.total_scans,
            pages_count = run.pages_count,
            "runtime scan stopped"
        );

        let stored = StoredRun { key, run };
        self.registry.emit(&AnalyzerEvent::RuntimeComplete {
            run: stored.clone(),
        });
        Ok(stored)
    }

    pub fn status(&self) -> ScanStatus {
        let state = self.runtime_lock();
        match &state.session {
            Some(session) => ScanStatus {
                active: true,
                total_scans: session.total_scans,
                pages_count: session.dataset.len(),
                started_at: Some(session.started_at),
            },
            None => ScanStatus {
                active: false,
                total_scans: 0,
                pages_count: 0,
                started_at: None,
            },
        }
    }

    pub fn is_runtime_active(&self) -> bool {
        self.runtime_lock().session.is_some()
    }

    /// Generation of the active runtime session, if any. Runtime injections
    /// carry it and only output tagged with it is recorded.
    pub fn runtime_session(&self) -> Option<u64> {
        let state = self.runtime_lock();
        state.session.as_ref().map(|_| state.generation)
    }

    fn is_generation_active(&self, generation: u64) -> bool {
        self.runtime_session() == Some(generation)
    }

    /// Append a runtime event to the session it was injected for. Ignored
    /// when that session is no longer active.
    pub(super) fn handle_runtime(&self, event: MarkupEvent) {
        let Some(active) = self.runtime_session() else {
            debug!(url = ?event.url, "runtime event outside a session ignored");
            return;
        };
        if event.session != Some(active) {
            debug!(
                url = ?event.url,
                session = ?event.session,
                active,
                "runtime event from another session ignored"
            );
            return;
        }
        let Some(record) = self.extract_or_drop(&event) else {
            return;
        };
        let origin = event
            .url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string());

        let totals = {
            let mut state = self.runtime_lock();
            if state.generation != active {
                return;
            }
            let Some(session) = state.session.as_mut() else {
                return;
            };
            session.append(origin.clone(), record)
        };

        debug!(origin = %origin, total_scans = totals.total_scans, "runtime scan recorded");
        self.registry.emit(&AnalyzerEvent::RuntimeUpdate {
            origin: Some(origin),
            totals,
        });
    }

    async fn inject_runtime(&self, surface: &Surface, generation: u64) {
        if !surface.is_injectable() {
            debug!(surface = %surface.id, url = %surface.url, "skipping non-retrievable surface");
            return;
        }
        if !self.is_generation_active(generation) {
            return;
        }
        if let Err(e) = self
            .host
            .inject(&surface.id, ScanKind::Runtime, Some(generation))
            .await
        {
            warn!(surface = %surface.id, "runtime injection failed: {e}");
        }
    }
}

async fn watch_surfaces(
    engine: Weak<ScanEngine>,
    generation: u64,
    loads: Option<broadcast::Receiver<Surface>>,
) {
    if let Some(engine) = engine.upgrade() {
        match engine.host.surfaces().await {
            Ok(surfaces) => {
                for surface in &surfaces {
                    engine.inject_runtime(surface, generation).await;
                }
            }
            Err(e) => warn!("cannot list open surfaces: {e}"),
        }
    }

    let Some(mut loads) = loads else {
        return;
    };
    loop {
        match loads.recv().await {
            Ok(surface) => {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                if !engine.is_generation_active(generation) {
                    return;
                }
                engine.inject_runtime(&surface, generation).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "missed page load notifications");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
