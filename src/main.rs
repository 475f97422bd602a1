use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "ticktrek")]
#[command(version, about = "Multi-tenant task, project and ticket tracker")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.ticktrek/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Port to serve on (overrides ticktrek.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides ticktrek.toml)
        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (CORS permissive for a local frontend dev server)
        #[arg(long)]
        dev: bool,

        /// Data file path (overrides ticktrek.toml)
        #[arg(long)]
        data_path: Option<PathBuf>,
    },
    /// Create `.ticktrek/` with a default config and a seeded data file
    Init,
    /// Generate an invite token for an organization
    Invite {
        /// Organization id (e.g. "ticktrek-inc")
        org: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default ticktrek.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve {
            port,
            host,
            dev,
            data_path,
        } => {
            cmd::cmd_serve(
                &project_dir,
                cli.verbose,
                cmd::ServeOverrides {
                    port: *port,
                    host: host.clone(),
                    dev: *dev,
                    data_path: data_path.clone(),
                },
            )
            .await?;
        }
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Invite { org } => cmd::cmd_invite(&project_dir, org)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
