//! Configuration view and validation commands: `pagesmith config`.

use anyhow::Result;

use pagesmith::config::{DEFAULT_CONFIG_FILE, Settings};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let settings = super::resolve_settings(cli)?;
            println!();
            println!("Pagesmith Configuration");
            println!("=======================");
            println!();
            println!("{}", settings.describe()?);
        }
        Some(ConfigCommands::Validate) => {
            let settings = super::resolve_settings(cli)?;
            let mut warnings = settings.validate();
            if let Err(e) = settings.require_secrets() {
                warnings.push(e.to_string());
            }

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());
            if path.exists() {
                println!("{} already exists.", path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            Settings::default().save(&path)?;
            println!("Created {}", path.display());
            println!("Secrets stay in the environment: SHARED_SECRET, GITHUB_TOKEN, LLM_API_KEY.");
        }
    }

    Ok(())
}
