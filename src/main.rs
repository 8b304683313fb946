use anyhow::{Context, Result};
use clap::Parser;
use docrepo::server;
use docrepo::storage::{DEFAULT_CHECKPOINT_EVERY, DurabilityMode, MemoryStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docrepo-server")]
#[command(about = "Document server backing networked docrepo repositories")]
struct Args {
    #[arg(long, env = "DOCREPO_BIND", default_value = "127.0.0.1:7070")]
    bind: SocketAddr,

    /// Directory for the write-ahead log and snapshots; in-memory when absent.
    #[arg(long, env = "DOCREPO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// sync, async or none
    #[arg(long, default_value = "async")]
    durability: DurabilityMode,

    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_EVERY)]
    checkpoint_every: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let store = match &args.data_dir {
        Some(dir) => MemoryStore::open(dir, args.durability, args.checkpoint_every)
            .with_context(|| format!("failed to open data directory {}", dir.display()))?,
        None => MemoryStore::new(),
    };

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    info!(
        bind_addr = %args.bind,
        durability = %args.durability,
        "docrepo server starting"
    );
    server::serve(listener, Arc::new(store), shutdown)
        .await
        .context("server error")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docrepo=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
    shutdown.cancel();
}
