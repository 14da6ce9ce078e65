//! Tracing subscriber setup.
//!
//! Console output is always on (text or JSON). When a log directory is given,
//! a daily-rolling file copy is written through a non-blocking appender; the
//! returned guard must be held for the life of the process so buffered lines
//! are flushed on exit.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "pagesmith=info,tower_http=info";
const LOG_FILE_PREFIX: &str = "pagesmith.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub json: bool,
    pub verbose: bool,
    pub dir: Option<PathBuf>,
}

/// Build the filter: `RUST_LOG` wins, then `--verbose`, then the default.
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("pagesmith=debug,tower_http=debug")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    })
}

/// Install the global subscriber.
pub fn init_logging(opts: &LogOptions) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &opts.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_json = opts.json.then(|| fmt::layer().json().with_target(true));
    let console_text = (!opts.json).then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter(opts.verbose))
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        assert!(filter.to_string().contains("pagesmith=info"));
    }

    #[test]
    fn test_log_options_default_is_plain_console() {
        let opts = LogOptions::default();
        assert!(!opts.json);
        assert!(!opts.verbose);
        assert!(opts.dir.is_none());
    }
}
