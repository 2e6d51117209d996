//! Page Analyzer daemon — entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::sync::mpsc;
use tracing::info;

use page_analyzer::{HostPlatform, DEFAULT_SCAN_TIMEOUT_MS};
use page_analyzer_daemon::{open_store, ChromiumHost, Daemon, DaemonConfig, Server, INBOX_CAPACITY};

#[derive(Parser)]
#[command(
    name = "page-analyzer",
    about = "Structural page scans of a headless Chromium, served over a Unix socket",
    version
)]
struct Cli {
    /// Unix socket path.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// SQLite database for durable results.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Keep durable results in memory.
    #[arg(long, global = true)]
    memory: bool,

    /// One-shot scan deadline in milliseconds.
    #[arg(long, global = true, default_value_t = DEFAULT_SCAN_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch Chromium and serve the socket protocol (default).
    Serve,

    /// Open a page, scan it once and print the record as JSON.
    Scan {
        /// Address to load.
        url: String,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   page-analyzer completions bash > ~/.local/share/bash-completion/completions/page-analyzer
    ///   page-analyzer completions zsh > ~/.zfunc/_page-analyzer
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let config = DaemonConfig::resolve(
        cli.socket.as_deref(),
        cli.db.as_deref(),
        cli.memory,
        cli.timeout_ms,
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await?,

        Commands::Scan { url } => {
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            let host = Arc::new(ChromiumHost::launch(tx).await?);
            let daemon = Daemon::assemble(
                host.clone(),
                rx,
                open_store(config.db_path.as_deref()),
                config.scan_timeout_ms,
            );

            let surface = host
                .open_surface(&url)
                .await
                .with_context(|| format!("failed to open {url}"))?;
            let record = daemon
                .engine
                .scan_once(&surface.id)
                .await
                .with_context(|| format!("scan of {url} failed"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "page-analyzer", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("starting page analyzer v{}", env!("CARGO_PKG_VERSION"));

    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let host = Arc::new(ChromiumHost::launch(tx).await?);
    let daemon = Daemon::assemble(
        host,
        rx,
        open_store(config.db_path.as_deref()),
        config.scan_timeout_ms,
    );

    let server = Server::new(&config.socket_path, daemon.facade.clone(), daemon.bus.clone());
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        shutdown.notify_one();
    });

    let result = server.start().await;

    // Persist a session left running at shutdown.
    if daemon.engine.is_runtime_active() {
        if let Ok(stored) = daemon.engine.stop_runtime().await {
            info!(key = %stored.key, "runtime scan saved on shutdown");
        }
    }

    result
}
