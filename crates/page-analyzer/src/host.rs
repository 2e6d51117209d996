//! Host platform abstraction: enumerating surfaces, injecting extraction
//! routines and observing page loads.

use crate::types::{ScanKind, SurfaceId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A page or tab the host can inject into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Surface {
    pub id: SurfaceId,
    pub url: String,
    pub title: Option<String>,
}

impl Surface {
    pub fn is_injectable(&self) -> bool {
        is_injectable_url(&self.url)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("surface {0} not found")]
    SurfaceNotFound(SurfaceId),

    #[error("host refused: {0}")]
    Refused(String),

    #[error("host unavailable: {0}")]
    Unavailable(String),
}

/// The browser (or fake) the engine drives.
///
/// `inject` only schedules the extraction routine; its output arrives later
/// as a [`crate::types::MarkupEvent`] on the engine's inbox.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Look up a single surface.
    async fn surface(&self, id: &SurfaceId) -> Option<Surface>;

    /// All surfaces currently open.
    async fn surfaces(&self) -> Result<Vec<Surface>, HostError>;

    /// Schedule the extraction routine of `kind` on a surface.
    ///
    /// `session` tags runtime injections; the host copies it into the
    /// resulting [`crate::types::MarkupEvent`] unchanged.
    async fn inject(
        &self,
        id: &SurfaceId,
        kind: ScanKind,
        session: Option<u64>,
    ) -> Result<(), HostError>;

    /// Subscribe to completed page loads.
    fn watch_loads(&self) -> Result<broadcast::Receiver<Surface>, HostError>;

    /// Open a new surface at `url`.
    async fn open_surface(&self, url: &str) -> Result<Surface, HostError>;
}

/// Only plain web pages accept injection; browser-internal and extension
/// pages are never touched.
pub fn is_injectable_url(url: &str) -> bool {
    let url = url.trim_start();
    ["http://", "https://"].iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}
