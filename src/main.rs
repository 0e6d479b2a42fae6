#![warn(
    clippy::all,
    clippy::nursery,
    clippy::missing_docs_in_private_items,
    clippy::pedantic,
    missing_docs
)]

//! Prints how the configured library is located and loaded by this process.
//!
//! Configuration is read from `DYLIB_PROBE_LIBRARY`, `DYLIB_PROBE_SYMBOL` and
//! `DYLIB_PROBE_BASE_DIR`, diagnostics are controlled with `RUST_LOG`.

use anyhow::{Context, Result};
use dylib_probe::{Banner, Options, Runner};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the diagnostics subscriber, writing to stderr so stdout only
/// carries the report.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    init_logging();

    let options = Options::from_env().context("failed to read options")?;
    println!("{}", Banner(&options));

    let results = Runner::new(&options).run_with(|result| println!("\n{}", result));

    let succeeded = results.iter().filter(|result| result.succeeded()).count();
    println!("\n{} of {} strategies succeeded", succeeded, results.len());

    Ok(())
}
