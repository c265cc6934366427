//! Logging initialization for the CLI.
//!
//! Logging is owned by the CLI crate; the library crates only emit
//! `tracing` events and never install a subscriber.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber.
///
/// * `verbosity` — 0 = INFO, 1 = DEBUG, 2+ = TRACE
/// * `json` — emit JSON lines to stderr for machine consumption
///
/// # Panics
/// Panics if a subscriber is already installed.
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // RUST_LOG is honored; the verbosity flag overrides the packbay crates.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"))
        .add_directive(format!("packbay={level}").parse().unwrap())
        .add_directive(format!("packbay_core={level}").parse().unwrap())
        .add_directive(format!("packbay_rag={level}").parse().unwrap())
        .add_directive(format!("packbay_server={level}").parse().unwrap())
        .add_directive(format!("packbay_store={level}").parse().unwrap());

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
