//! `packbay serve` command: run the proxy until ctrl-c.

use miette::{IntoDiagnostic, Result};
use packbay_core::ProxyConfig;
use packbay_server::AppState;
use std::net::SocketAddr;

pub async fn run(config: ProxyConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .into_diagnostic()?;
    let registry = config.registry_url.clone();
    let cache_dir = config.cache_dir.clone();

    let state = AppState::build(config).into_diagnostic()?;
    let app = packbay_server::router(state);

    println!();
    println!("  packbay proxy listening on http://{addr}");
    println!("  upstream registry: {registry}");
    println!("  cache directory:   {}", cache_dir.display());
    println!();
    println!("  Point your package manager at http://{addr} and ask");
    println!("  questions at POST /api/chat");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    Ok(())
}

/// In-progress downloads are best-effort on shutdown; leftovers are
/// reclaimed at next startup.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
    }
    tracing::info!("shutting down");
}
