//! Tracing subscriber setup for binaries built on this crate.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Error, Result};

/// Installs a global `fmt` subscriber writing to stderr, leaving stdout to
/// command output.
///
/// `RUST_LOG` takes precedence when set; otherwise the level is `debug` with
/// `verbose` and `info` without.
pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
