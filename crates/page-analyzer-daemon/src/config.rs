//! Configuration loading and resolution.
//!
//! Every path resolves in the same order: explicit flag, then environment
//! variable, then a default under `~/.page-analyzer/`.

use std::path::{Path, PathBuf};

pub const SOCKET_ENV: &str = "PAGE_ANALYZER_SOCKET";
pub const DB_ENV: &str = "PAGE_ANALYZER_DB";
pub const CHROMIUM_ENV: &str = "PAGE_ANALYZER_CHROMIUM_PATH";

/// `~/.page-analyzer`, or `/tmp/.page-analyzer` without a home directory.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".page-analyzer")
}

/// Resolve the daemon socket path.
pub fn resolve_socket_path(explicit: Option<&Path>) -> PathBuf {
    resolve_path(explicit, SOCKET_ENV, "page-analyzer.sock")
}

/// Resolve the durable database path.
pub fn resolve_db_path(explicit: Option<&Path>) -> PathBuf {
    resolve_path(explicit, DB_ENV, "results.db")
}

fn resolve_path(explicit: Option<&Path>, env_var: &str, default_name: &str) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(env_path) = std::env::var(env_var) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    data_dir().join(default_name)
}

/// Settled daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    /// `None` keeps durable results in memory only.
    pub db_path: Option<PathBuf>,
    pub scan_timeout_ms: u64,
}

impl DaemonConfig {
    pub fn resolve(
        socket: Option<&Path>,
        db: Option<&Path>,
        memory: bool,
        scan_timeout_ms: u64,
    ) -> Self {
        Self {
            socket_path: resolve_socket_path(socket),
            db_path: (!memory).then(|| resolve_db_path(db)),
            scan_timeout_ms,
        }
    }
}
