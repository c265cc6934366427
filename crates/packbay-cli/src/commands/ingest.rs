//! `packbay ingest <package>` command: one-shot documentation ingest.

use miette::{IntoDiagnostic, Result};
use packbay_core::ProxyConfig;
use packbay_server::AppState;
use serde_json::json;

pub async fn run(config: ProxyConfig, package: &str) -> Result<()> {
    let state = AppState::build(config).into_diagnostic()?;
    let report = state.ingest.ingest_package(package).await.into_diagnostic()?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "package": report.package,
            "chars": report.chars,
            "chunks": report.chunks,
            "embedded": report.embedded,
        }))
        .into_diagnostic()?
    );
    Ok(())
}
