//! HTTP server command: `ticktrek serve`.

use anyhow::Result;
use std::path::{Path, PathBuf};

use ticktrek::config::{TickTrekToml, config_dir};
use ticktrek::telemetry;
use ticktrek::workspace::server;

/// Flags that take precedence over the file and environment.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub dev: bool,
    pub data_path: Option<PathBuf>,
}

pub async fn cmd_serve(project_dir: &Path, verbose: bool, overrides: ServeOverrides) -> Result<()> {
    let mut toml = TickTrekToml::load_or_default(&config_dir(project_dir))?;
    toml.apply_env()?;

    if let Some(port) = overrides.port {
        toml.server.port = port;
    }
    if let Some(host) = overrides.host {
        toml.server.host = Some(host);
    }
    if overrides.dev {
        toml.server.dev_mode = true;
    }
    if let Some(path) = overrides.data_path {
        toml.storage.data_path = path;
    }

    telemetry::init_tracing(toml.log.json, verbose)?;
    for warning in toml.validate() {
        tracing::warn!("{}", warning);
    }

    server::start_server(toml.server_config(project_dir)).await
}
