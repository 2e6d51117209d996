//! Headless Chromium host using chromiumoxide.
//!
//! Each page the daemon opens becomes a surface with a daemon-assigned id.
//! Injection evaluates a small routine in the page that serializes the
//! document; its output is posted to the engine inbox as a [`MarkupEvent`].

use crate::config::{data_dir, CHROMIUM_ENV};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::EventLoadEventFired;
use chromiumoxide::page::Page;
use dashmap::DashMap;
use futures::StreamExt;
use page_analyzer::{HostError, HostPlatform, MarkupEvent, ScanKind, Surface, SurfaceId};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Serializes the document the way the engine expects it.
const EXTRACTION_ROUTINE: &str = r#"JSON.stringify({
    markup: document.documentElement ? document.documentElement.outerHTML : "",
    url: location.href,
    title: document.title,
    timestamp: Date.now()
})"#;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. Environment override
    if let Ok(p) = std::env::var(CHROMIUM_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.page-analyzer/chromium/
    let local = data_dir().join("chromium");
    let candidates = if cfg!(target_os = "macos") {
        vec![
            local.join("chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
            local.join("chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
            local.join("chrome"),
        ]
    } else {
        vec![local.join("chrome-linux64/chrome"), local.join("chrome")]
    };
    if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
        return Some(found);
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Output of [`EXTRACTION_ROUTINE`].
#[derive(Debug, Deserialize)]
struct RoutineOutput {
    #[serde(default)]
    markup: String,
    url: Option<String>,
    title: Option<String>,
    timestamp: Option<i64>,
}

/// A [`HostPlatform`] backed by a headless Chromium instance.
pub struct ChromiumHost {
    browser: Browser,
    pages: DashMap<SurfaceId, Page>,
    next_id: AtomicU64,
    loads: broadcast::Sender<Surface>,
    inbox: mpsc::Sender<MarkupEvent>,
    handler: JoinHandle<()>,
}

impl ChromiumHost {
    /// Launch headless Chromium. Markup from injected routines is sent to `inbox`.
    pub async fn launch(inbox: mpsc::Sender<MarkupEvent>) -> Result<Self> {
        let chrome_path = find_chromium().with_context(|| {
            format!("Chromium not found. Set {CHROMIUM_ENV} or install Chrome.")
        })?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });
        info!("Chromium host launched");

        let (loads, _) = broadcast::channel(64);
        Ok(Self {
            browser,
            pages: DashMap::new(),
            next_id: AtomicU64::new(1),
            loads,
            inbox,
            handler,
        })
    }

    fn page(&self, id: &SurfaceId) -> Option<Page> {
        self.pages.get(id).map(|entry| entry.value().clone())
    }
}

impl Drop for ChromiumHost {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

async fn describe(id: &SurfaceId, page: &Page) -> Surface {
    let url = page.url().await.ok().flatten().unwrap_or_default();
    let title = page.get_title().await.ok().flatten();
    Surface {
        id: id.clone(),
        url,
        title,
    }
}

async fn run_routine(page: &Page) -> Result<RoutineOutput> {
    let result = page
        .evaluate(EXTRACTION_ROUTINE)
        .await
        .context("extraction routine failed")?;
    let text: String = result
        .into_value()
        .map_err(|e| anyhow::anyhow!("failed to convert routine result: {e:?}"))?;
    serde_json::from_str(&text).context("routine returned malformed output")
}

#[async_trait]
impl HostPlatform for ChromiumHost {
    async fn surface(&self, id: &SurfaceId) -> Option<Surface> {
        let page = self.page(id)?;
        Some(describe(id, &page).await)
    }

    async fn surfaces(&self) -> Result<Vec<Surface>, HostError> {
        let pages: Vec<(SurfaceId, Page)> = self
            .pages
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let mut surfaces = Vec::with_capacity(pages.len());
        for (id, page) in &pages {
            surfaces.push(describe(id, page).await);
        }
        surfaces.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(surfaces)
    }

    async fn inject(
        &self,
        id: &SurfaceId,
        kind: ScanKind,
        session: Option<u64>,
    ) -> Result<(), HostError> {
        let page = self
            .page(id)
            .ok_or_else(|| HostError::SurfaceNotFound(id.clone()))?;
        // Fails fast when the target is gone.
        page.url()
            .await
            .map_err(|e| HostError::Refused(e.to_string()))?;

        let inbox = self.inbox.clone();
        let surface_id = id.clone();
        tokio::spawn(async move {
            match run_routine(&page).await {
                Ok(output) => {
                    let event = MarkupEvent {
                        kind,
                        markup: output.markup,
                        surface_id: Some(surface_id),
                        url: output.url,
                        title: output.title,
                        timestamp: output.timestamp,
                        session,
                    };
                    if inbox.send(event).await.is_err() {
                        debug!("engine inbox closed");
                    }
                }
                Err(e) => warn!(surface = %surface_id, %kind, "extraction routine failed: {e:#}"),
            }
        });
        Ok(())
    }

    fn watch_loads(&self) -> Result<broadcast::Receiver<Surface>, HostError> {
        Ok(self.loads.subscribe())
    }

    async fn open_surface(&self, url: &str) -> Result<Surface, HostError> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| HostError::Unavailable(e.to_string()))?;
        let id = SurfaceId::new(format!(
            "surface-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));

        let mut loaded = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(|e| HostError::Unavailable(e.to_string()))?;
        let loads = self.loads.clone();
        let listener_page = page.clone();
        let listener_id = id.clone();
        tokio::spawn(async move {
            while loaded.next().await.is_some() {
                let surface = describe(&listener_id, &listener_page).await;
                debug!(surface = %surface.id, url = %surface.url, "page loaded");
                let _ = loads.send(surface);
            }
        });

        self.pages.insert(id.clone(), page.clone());
        let surface = describe(&id, &page).await;
        info!(surface = %surface.id, url = %surface.url, "surface opened");
        Ok(surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routine_output_parses() {
        let output: RoutineOutput = serde_json::from_str(
            r#"{"markup": "<html></html>", "url": "https://a/", "title": "", "timestamp": 7}"#,
        )
        .unwrap();
        assert_eq!(output.markup, "<html></html>");
        assert_eq!(output.timestamp, Some(7));
    }

    #[test]
    fn test_find_chromium_honours_env() {
        let exe = std::env::current_exe().unwrap();
        std::env::set_var(CHROMIUM_ENV, &exe);
        assert_eq!(find_chromium(), Some(exe));
        std::env::remove_var(CHROMIUM_ENV);
    }

    #[tokio::test]
    #[ignore] // requires Chromium
    async fn test_launch_and_scan_data_url() {
        let (tx, mut rx) = mpsc::channel(4);
        let host = ChromiumHost::launch(tx).await.unwrap();
        let surface = host
            .open_surface("data:text/html,<title>Hi</title><h1>x</h1>")
            .await
            .unwrap();
        assert!(surface.id.as_str().starts_with("surface-"));

        host.inject(&surface.id, ScanKind::OneTime, None).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ScanKind::OneTime);
        assert!(event.markup.contains("<h1>x</h1>"));
    }
}
