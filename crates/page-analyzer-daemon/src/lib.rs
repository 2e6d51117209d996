//! Page Analyzer daemon: a Chromium host, the scan facade and a Unix socket
//! server wired together.

pub mod chromium;
pub mod config;
pub mod protocol;
pub mod server;

pub use chromium::ChromiumHost;
pub use config::DaemonConfig;
pub use server::Server;

use page_analyzer::{
    BusSubscriber, EngineConfig, EventBus, Facade, HostPlatform, MarkupEvent, MemoryTier,
    ResultStore, ScanEngine, SqliteTier, SubscriptionRegistry,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capacity of the markup inbox between host and engine.
pub const INBOX_CAPACITY: usize = 256;

/// Build the result store: SQLite when `db_path` is given and opens, memory
/// otherwise. The session tier is always in memory.
pub fn open_store(db_path: Option<&Path>) -> ResultStore {
    let store = ResultStore::new().with_session(Arc::new(MemoryTier::new()));
    let Some(path) = db_path else {
        info!("durable results kept in memory");
        return store.with_durable(Arc::new(MemoryTier::new()));
    };
    match SqliteTier::open(path) {
        Ok(tier) => {
            info!("durable results at {}", path.display());
            store.with_durable(Arc::new(tier))
        }
        Err(e) => {
            warn!("cannot open {}: {e}; durable results kept in memory", path.display());
            store.with_durable(Arc::new(MemoryTier::new()))
        }
    }
}

/// Everything a running daemon needs besides the host.
pub struct Daemon {
    pub engine: Arc<ScanEngine>,
    pub facade: Facade,
    pub bus: Arc<EventBus>,
}

impl Daemon {
    /// Wire an engine to `host`, draining `inbox` and forwarding all events
    /// to a fresh [`EventBus`].
    pub fn assemble(
        host: Arc<dyn HostPlatform>,
        inbox: mpsc::Receiver<MarkupEvent>,
        store: ResultStore,
        scan_timeout_ms: u64,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(SubscriptionRegistry::new());
        registry.subscribe(Arc::new(BusSubscriber::new(Arc::clone(&bus))));

        let engine = Arc::new(ScanEngine::new(
            host,
            Arc::new(store),
            registry,
            EngineConfig::with_timeout_ms(scan_timeout_ms),
        ));
        engine.spawn_inbox(inbox);

        Self {
            facade: Facade::new(Arc::clone(&engine)),
            engine,
            bus,
        }
    }
}
