use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use hadir_server::FileStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = std::env::var("HADIR_SERVER_BIND")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()
        .context("HADIR_SERVER_BIND is not a socket address")?;
    let data_dir = std::env::var("HADIR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("db"));

    let store = FileStore::open(&data_dir)
        .await
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
    tracing::info!(dir = %data_dir.display(), "collections ready");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "hadir-server listening");

    hadir_server::serve(listener, Arc::new(store), async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("hadir-server shutting down");
    })
    .await
    .context("server error")?;

    Ok(())
}
