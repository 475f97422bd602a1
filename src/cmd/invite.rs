//! Invite token command: `ticktrek invite <org>`.

use anyhow::{Context, Result};
use std::path::Path;

use ticktrek::config::{TickTrekToml, config_dir};
use ticktrek::workspace::auth::issue_invite;
use ticktrek::workspace::store::JsonStore;

pub fn cmd_invite(project_dir: &Path, org: &str) -> Result<()> {
    let mut toml = TickTrekToml::load_or_default(&config_dir(project_dir))?;
    toml.apply_env()?;
    let server = toml.server_config(project_dir);

    let mut store = JsonStore::open(&server.data_path, &server.seed_admin_password)
        .context("Stop the server or create the invite with POST /api/invites instead")?;
    let token = store
        .apply(|snap| issue_invite(snap, org))
        .with_context(|| format!("Failed to create invite for organization '{}'", org))?;

    println!("Invite token: {}", token);
    println!("Sign-up link: /signup?token={}", token);
    Ok(())
}
