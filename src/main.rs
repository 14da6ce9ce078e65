use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pagesmith::logging::{LogOptions, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "pagesmith")]
#[command(
    version,
    about = "Generate a page from a brief, publish it to GitHub Pages, report back"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (defaults to ./pagesmith.toml when present)
    #[arg(long, global = true, env = "PAGESMITH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write daily-rolling JSON logs into this directory
    #[arg(long, global = true, env = "PAGESMITH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP job intake server
    Serve {
        /// Interface to bind (overrides config and PAGESMITH_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config and PAGESMITH_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single job from a JSON request file in the foreground
    Run {
        /// Job request file, same shape as the POST /api-endpoint body
        #[arg(long)]
        job: PathBuf,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration with secrets redacted
    Show,
    /// Validate configuration and report warnings
    Validate,
    /// Write a default pagesmith.toml in the current directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _log_guard = init_logging(&LogOptions {
        json: cli.log_json,
        verbose: cli.verbose,
        dir: cli.log_dir.clone(),
    })?;

    match &cli.command {
        Commands::Serve { host, port } => {
            cmd::cmd_serve(&cli, host.clone(), *port).await?;
        }
        Commands::Run { job } => cmd::cmd_run(&cli, job).await?,
        Commands::Config { command } => cmd::cmd_config(&cli, command.clone())?,
    }

    Ok(())
}
