use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sentinel_agent::collector::SysinfoCollector;
use sentinel_agent::config::{AgentConfig, StorageBackend};
use sentinel_agent::sampler::{spawn_samplers, SharedCollector};
use sentinel_agent::state::AppState;
use sentinel_agent::store::{MemoryStore, SqliteStore, Store};
use sentinel_agent::{http, tls};

/// Host telemetry agent: samples processes, sockets and system load, raises alerts
/// and serves them over HTTP and WebSocket.
#[derive(Parser, Debug)]
#[command(name = "sentinel_agent", version, about)]
struct Cli {
    /// Listen port (overrides config and SENTINEL_AGENT_PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve over TLS with a self-signed certificate.
    #[arg(long = "enableSSL")]
    enable_ssl: bool,

    /// Path to a JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `sentinel_agent=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// SQLite database path.
    #[arg(long, conflicts_with = "memory")]
    db: Option<PathBuf>,

    /// Keep everything in memory instead of SQLite.
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = AgentConfig::load(cli.config.as_deref())?;
    cfg.apply_env();
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if cli.enable_ssl {
        cfg.enable_ssl = true;
    }
    if let Some(level) = cli.log_level {
        cfg.log_level = level;
    }
    if let Some(db) = cli.db {
        cfg.storage.backend = StorageBackend::Sqlite;
        cfg.storage.path = db;
    }
    if cli.memory {
        cfg.storage.backend = StorageBackend::Memory;
    }
    cfg.validate()?;

    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(&directives),
        _ => EnvFilter::try_new(&cfg.log_level),
    }
    .with_context(|| format!("invalid log level: {}", cfg.log_level))?;
    fmt().with_env_filter(filter).with_target(false).init();

    let store: Arc<dyn Store> = match cfg.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => Arc::new(
            SqliteStore::open(&cfg.storage.path)
                .with_context(|| format!("opening {}", cfg.storage.path.display()))?,
        ),
    };
    let state = AppState::new(&cfg, store)?;

    if cfg.sampling.enabled {
        let s = &cfg.sampling;
        let _samplers = spawn_samplers(state.pipeline.clone(), s, || -> SharedCollector {
            Arc::new(Mutex::new(SysinfoCollector::new(s)))
        });
    }

    let app = http::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));

    if cfg.enable_ssl {
        let (cert, key) = tls::ensure_self_signed_cert()?;
        let tls_cfg = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
            .await
            .context("loading TLS certificate")?;
        info!(%addr, "sentinel_agent listening (TLS)");
        axum_server::bind_rustls(addr, tls_cfg)
            .serve(app.into_make_service())
            .await
            .context("TLS server")?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %listener.local_addr()?, "sentinel_agent listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("HTTP server")?;
    Ok(())
}
