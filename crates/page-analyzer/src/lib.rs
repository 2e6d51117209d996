//! Page Analyzer — structural page extraction and scan orchestration.
//!
//! The [`engine::ScanEngine`] decides when extraction runs, injects the
//! extraction routine through a [`host::HostPlatform`], turns raw markup into a
//! [`types::StructuralSummary`] and fans results out to the
//! [`store::ResultStore`] tiers and to [`events::SubscriptionRegistry`]
//! listeners. The [`facade::Facade`] maps command messages onto the engine.

pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod extract;
pub mod facade;
pub mod host;
pub mod store;
pub mod types;

pub use engine::{EngineConfig, ScanEngine, DEFAULT_SCAN_TIMEOUT_MS};
pub use error::{AnalyzerError, AnalyzerResult};
pub use events::{AnalyzerEvent, BusSubscriber, EventBus, Subscriber, SubscriptionId, SubscriptionRegistry};
pub use extract::extract;
pub use facade::{Command, Facade, Reply};
pub use host::{is_injectable_url, HostError, HostPlatform, Surface};
pub use store::{DurableTier, MemoryTier, ResultStore, SessionTier, SqliteTier, StoreError};
pub use types::*;
