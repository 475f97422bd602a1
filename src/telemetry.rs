//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` wins over the default level,
/// which is `debug` when `verbose` is set and `info` otherwise.
pub fn init_tracing(json: bool, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json())
            .try_init()
            .context("Failed to install tracing subscriber")
    } else {
        registry
            .with(fmt::layer().with_target(false))
            .try_init()
            .context("Failed to install tracing subscriber")
    }
}
