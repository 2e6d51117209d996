//! Command dispatch: typed command messages in, replies out.
//!
//! Commands are JSON objects `{ "type": ..., ...payload }` with camelCase
//! names. Results of long-running work (one-shot scans, runtime progress)
//! reach callers as [`AnalyzerEvent`](crate::events::AnalyzerEvent)s through
//! the subscription registry, not through the reply.

use crate::engine::ScanEngine;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::events::{Subscriber, SubscriptionId};
use crate::host::Surface;
use crate::types::{DurableEntry, ScanRecord, ScanStatus, StoredRun, SurfaceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    StartOneTime { surface_id: SurfaceId },
    StartRuntime,
    StopRuntime,
    GetStatus,
    ListDurable,
    GetDurable { key: String },
    ListRuns,
    GetLastRun,
    GetSessionLast,
    GetSessionForSurface { surface_id: SurfaceId },
    GetSessionBySurface,
    ListSurfaces,
    OpenSurface { url: String },
}

impl Command {
    pub const TYPES: &'static [&'static str] = &[
        "startOneTime",
        "startRuntime",
        "stopRuntime",
        "getStatus",
        "listDurable",
        "getDurable",
        "listRuns",
        "getLastRun",
        "getSessionLast",
        "getSessionForSurface",
        "getSessionBySurface",
        "listSurfaces",
        "openSurface",
    ];

    /// Parse a command message.
    ///
    /// Messages without a known `type` are logged and yield `Ok(None)`. A
    /// known type with a malformed payload is an error.
    pub fn parse(value: Value) -> Result<Option<Command>, serde_json::Error> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);
        match kind.as_deref() {
            Some(kind) if Self::TYPES.contains(&kind) => serde_json::from_value(value).map(Some),
            Some(kind) => {
                warn!(command = kind, "ignoring unknown command");
                Ok(None)
            }
            None => {
                warn!("ignoring command without a type");
                Ok(None)
            }
        }
    }
}

/// Reply payload of a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Accepted { accepted: bool },
    Stopped(StoredRun),
    Status(ScanStatus),
    Entries(Vec<DurableEntry>),
    Entry(Option<DurableEntry>),
    Runs(Vec<StoredRun>),
    Run(Option<StoredRun>),
    Record(Option<ScanRecord>),
    Records(BTreeMap<SurfaceId, ScanRecord>),
    Surfaces(Vec<Surface>),
    Surface(Surface),
}

/// Maps commands onto a shared [`ScanEngine`].
#[derive(Clone)]
pub struct Facade {
    engine: Arc<ScanEngine>,
}

impl Facade {
    pub fn new(engine: Arc<ScanEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ScanEngine> {
        &self.engine
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.engine.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.engine.registry().unsubscribe(id)
    }

    /// Run one command.
    ///
    /// `startOneTime` returns as soon as the scan is under way; its outcome is
    /// emitted as `scanComplete` or `scanError`. A second request on a surface
    /// that already has one in flight fails with `ScanPending`. Must be called from within a
    /// tokio runtime.
    pub async fn dispatch(&self, command: Command) -> AnalyzerResult<Reply> {
        debug!(?command, "dispatching command");
        let engine = &self.engine;
        let store = engine.store();
        let reply = match command {
            Command::StartOneTime { surface_id } => {
                // Outcome is reported through the registry.
                engine.start_scan(&surface_id)?;
                Reply::Accepted { accepted: true }
            }
            Command::StartRuntime => Reply::Accepted {
                accepted: engine.start_runtime(),
            },
            Command::StopRuntime => Reply::Stopped(engine.stop_runtime().await?),
            Command::GetStatus => Reply::Status(engine.status()),
            Command::ListDurable => Reply::Entries(store.list_durable().await),
            Command::GetDurable { key } => {
                let record = store.get_durable(&key).await;
                Reply::Entry(record.map(|record| DurableEntry { key, record }))
            }
            Command::ListRuns => Reply::Runs(store.list_runs().await),
            Command::GetLastRun => Reply::Run(store.last_run().await),
            Command::GetSessionLast => Reply::Record(store.get_session_global().await),
            Command::GetSessionForSurface { surface_id } => {
                Reply::Record(store.get_session_per_surface(&surface_id).await)
            }
            Command::GetSessionBySurface => Reply::Records(store.session_by_surface().await),
            Command::ListSurfaces => Reply::Surfaces(
                engine
                    .host()
                    .surfaces()
                    .await
                    .map_err(|e| AnalyzerError::Host(e.to_string()))?,
            ),
            Command::OpenSurface { url } => Reply::Surface(
                engine
                    .host()
                    .open_surface(&url)
                    .await
                    .map_err(|e| AnalyzerError::Host(e.to_string()))?,
            ),
        };
        Ok(reply)
    }

    /// Parse and run a raw command message. `Ok(None)` means it was ignored.
    pub async fn handle_value(&self, value: Value) -> AnalyzerResult<Option<Reply>> {
        let command =
            Command::parse(value).map_err(|e| AnalyzerError::InvalidCommand(e.to_string()))?;
        match command {
            Some(command) => self.dispatch(command).await.map(Some),
            None => Ok(None),
        }
    }
}
