use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use tower_http::cors::CorsLayer;

use super::api::{self, AppState, SharedState};
use super::store::{JsonStore, StoreHandle};

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Bind address. `None` picks `0.0.0.0` in dev mode, `127.0.0.1` otherwise.
    pub host: Option<String>,
    pub data_path: PathBuf,
    /// Password of the seeded admin when the data file is created.
    pub seed_admin_password: String,
    pub dev_mode: bool,
    pub require_approval: bool,
    pub session_ttl_hours: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            host: None,
            data_path: PathBuf::from(".ticktrek/data.json"),
            seed_admin_password: "password123".to_string(),
            dev_mode: false,
            require_approval: false,
            session_ttl_hours: 24,
        }
    }
}

impl ServerConfig {
    pub fn bind_host(&self) -> &str {
        match &self.host {
            Some(host) => host,
            None if self.dev_mode => "0.0.0.0",
            None => "127.0.0.1",
        }
    }
}

/// Build the full application router: API, WebSocket and a JSON 404.
pub fn build_router(state: SharedState) -> Router {
    api::api_router().fallback(not_found).with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}

/// Start the server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let data_path = config.data_path.clone();
    let seed_password = config.seed_admin_password.clone();
    let store = tokio::task::spawn_blocking(move || JsonStore::open(&data_path, &seed_password))
        .await
        .context("Store initialization panicked")?
        .context("Failed to open data file")?;

    let state = Arc::new(AppState::new(
        StoreHandle::new(store),
        config.session_ttl_hours,
        config.require_approval,
    ));

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.bind_host(), config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        data = %config.data_path.display(),
        dev_mode = config.dev_mode,
        "TickTrek listening"
    );
    println!("TickTrek running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
