//! HTTP server for face analysis.
//!
//! Usage:
//!   gwansang-server                         # defaults + GWANSANG_* env
//!   gwansang-server --config server.json    # JSON config, env still wins

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gwansang::{
    build_router, AnalysisStore, AppState, FaceDetector, JsonlStore, MemoryStore, ServerConfig,
    StorageKind,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gwansang-server")]
#[command(author, version, about = "Face reading HTTP service", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn AnalysisStore>> {
    Ok(match config.storage.kind {
        StorageKind::Memory => Arc::new(MemoryStore::new()),
        StorageKind::Jsonl => Arc::new(
            JsonlStore::open(&config.storage.path)
                .with_context(|| format!("opening {}", config.storage.path.display()))?,
        ),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(config.log_json);

    let store = open_store(&config)?;
    let mut state = AppState::new(store)
        .with_upload_dir(&config.upload_dir)
        .with_max_upload_bytes(config.max_upload_bytes);

    match &config.detector {
        Some(detector) => match FaceDetector::load(detector) {
            Ok(d) => state = state.with_extractor(Arc::new(d)),
            Err(e) => warn!(error = %e, "face models unavailable; analysis requests will be refused"),
        },
        None => warn!("no detector configured; analysis requests will be refused"),
    }

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(
        addr = %config.bind,
        storage = ?config.storage.kind,
        upload_dir = %config.upload_dir.display(),
        "gwansang server listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server error")?;
    info!("server stopped");
    Ok(())
}
