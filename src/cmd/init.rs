//! Project initialization command: `ticktrek init`.

use anyhow::{Context, Result};
use std::path::Path;

use ticktrek::config::{CONFIG_FILE, TickTrekToml, config_dir};
use ticktrek::workspace::store::{JsonStore, SEED_ADMIN_EMAIL};

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let ticktrek_dir = config_dir(project_dir);
    std::fs::create_dir_all(&ticktrek_dir)
        .with_context(|| format!("Failed to create {}", ticktrek_dir.display()))?;

    let config_path = ticktrek_dir.join(CONFIG_FILE);
    let toml = if config_path.exists() {
        println!("Using existing {}", config_path.display());
        TickTrekToml::load(&config_path)?
    } else {
        let toml = TickTrekToml::default();
        toml.save(&config_path)?;
        println!("Created {}", config_path.display());
        toml
    };

    let server = toml.server_config(project_dir);
    if server.data_path.exists() {
        println!("Data file already present at {}", server.data_path.display());
    } else {
        JsonStore::open(&server.data_path, &server.seed_admin_password)?;
        println!("Seeded data file at {}", server.data_path.display());
        println!();
        println!("Sign in as {} with the seed_admin_password from [storage].", SEED_ADMIN_EMAIL);
    }
    println!();
    println!("Run 'ticktrek serve' to start the server.");
    Ok(())
}
