//! mymark sync server.
//!
//! Usage:
//!   mymark-sync-server --addr 0.0.0.0:3030 --db sync.db
//!
//! Runs the stand-in relay engine, which persists nothing: document state
//! lives on the clients. With `--db`, only workspace roots are stored.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mymark_sync::{DomainManager, EngineFactory, RelayEngineFactory, SyncConfig};
use mymark_sync_server::{build_router, AppState, TrustedHeaderResolver, DEFAULT_USER_HEADER};
use mymark_sync_store::{ChunkStoreProvider, DocumentRootStore, MemoryDatabase, SqliteDatabase};

#[derive(Parser, Debug)]
#[command(name = "mymark-sync-server")]
#[command(about = "Sync relay for mymark workspaces")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "MYMARK_SYNC_ADDR", default_value = "127.0.0.1:3030")]
    addr: SocketAddr,

    /// SQLite database path; in-memory storage if omitted
    #[arg(long, env = "MYMARK_SYNC_DB")]
    db: Option<PathBuf>,

    /// Header carrying the authenticated user id
    #[arg(long, env = "MYMARK_SYNC_USER_HEADER", default_value = DEFAULT_USER_HEADER)]
    user_header: String,

    /// Frames buffered per connection
    #[arg(long, env = "MYMARK_SYNC_OUTBOUND_QUEUE", default_value_t = 256)]
    outbound_queue: usize,

    /// Events buffered per user engine
    #[arg(long, env = "MYMARK_SYNC_ENGINE_QUEUE", default_value_t = 1024)]
    engine_queue: usize,

    /// Evict domains with no connections every N seconds; off if omitted
    #[arg(long, env = "MYMARK_SYNC_IDLE_SWEEP_SECS")]
    idle_sweep_secs: Option<u64>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let (stores, roots): (Arc<dyn ChunkStoreProvider>, Arc<dyn DocumentRootStore>) =
        match &args.db {
            Some(path) => {
                let db = SqliteDatabase::open(path)
                    .with_context(|| format!("opening database {}", path.display()))?;
                tracing::info!(path = %path.display(), "using sqlite storage");
                (Arc::new(db.clone()), Arc::new(db))
            }
            None => {
                let db = MemoryDatabase::new();
                tracing::warn!("no --db given, storage is in memory");
                (Arc::new(db.clone()), Arc::new(db))
            }
        };

    let config = SyncConfig {
        outbound_queue_capacity: args.outbound_queue,
        engine_queue_capacity: args.engine_queue,
        ..SyncConfig::default()
    };
    let manager = Arc::new(DomainManager::new(RelayEngineFactory, stores, config));

    let sessions = TrustedHeaderResolver::new(&args.user_header)
        .with_context(|| format!("invalid header name {:?}", args.user_header))?;

    if let Some(secs) = args.idle_sweep_secs.filter(|s| *s > 0) {
        spawn_idle_sweep(Arc::clone(&manager), Duration::from_secs(secs));
    }

    let app = build_router(AppState {
        manager: Arc::clone(&manager),
        roots,
        sessions: Arc::new(sessions),
    });

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    tracing::info!(addr = %args.addr, "mymark sync server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await
        .context("server error")?;

    manager.shutdown().await;
    Ok(())
}

fn spawn_idle_sweep<F: EngineFactory>(manager: Arc<DomainManager<F>>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = manager.evict_idle().await;
            if evicted > 0 {
                tracing::debug!(evicted, "idle sweep");
            }
        }
    });
}
