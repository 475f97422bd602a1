//! Configuration view and validation commands: `ticktrek config`.

use anyhow::Result;

use super::super::ConfigCommands;
use ticktrek::config::{CONFIG_FILE, TickTrekToml, config_dir};

fn print_config(toml: &TickTrekToml) {
    println!("[server]");
    println!("  port = {}", toml.server.port);
    match &toml.server.host {
        Some(host) => println!("  host = \"{}\"", host),
        None => println!("  host = (auto)"),
    }
    println!("  dev_mode = {}", toml.server.dev_mode);
    println!();
    println!("[storage]");
    println!("  data_path = \"{}\"", toml.storage.data_path.display());
    println!("  seed_admin_password = (hidden)");
    println!();
    println!("[auth]");
    println!("  require_approval = {}", toml.auth.require_approval);
    println!("  session_ttl_hours = {}", toml.auth.session_ttl_hours);
    println!();
    println!("[log]");
    println!("  json = {}", toml.log.json);
    println!();
}

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let ticktrek_dir = config_dir(project_dir);
    let config_path = ticktrek_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("TickTrek Configuration");
            println!("======================");
            println!();

            let mut toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                let toml = TickTrekToml::load(&config_path)?;
                print_config(&toml);
                toml
            } else {
                println!("No ticktrek.toml found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                let toml = TickTrekToml::default();
                print_config(&toml);
                println!("Run 'ticktrek config init' to create a ticktrek.toml file.");
                println!();
                toml
            };

            toml.apply_env()?;
            let server = toml.server_config(project_dir);
            println!("Effective values (with env overrides):");
            println!("  bind = {}:{}", server.bind_host(), server.port);
            println!("  data_path = \"{}\"", server.data_path.display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No ticktrek.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = TickTrekToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("ticktrek.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !ticktrek_dir.exists() {
                std::fs::create_dir_all(&ticktrek_dir)?;
            }

            let toml = TickTrekToml::default();
            toml.save(&config_path)?;

            println!("Created ticktrek.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] port, host, dev_mode");
            println!("  - [storage] data_path, seed_admin_password");
            println!("  - [auth] require_approval, session_ttl_hours");
            println!();
        }
    }

    Ok(())
}
