//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `run`    | `Run`            |
//! | `config` | `Config`         |

pub mod config;
pub mod run;
pub mod serve;

pub use config::cmd_config;
pub use run::cmd_run;
pub use serve::cmd_serve;

use anyhow::{Context, Result};
use pagesmith::config::Settings;

use crate::Cli;

/// File, then environment. CLI flags are applied by each command.
pub(crate) fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let mut settings = Settings::load_or_default(cli.config.as_deref(), &cwd)?;
    settings.apply_env()?;
    Ok(settings)
}
