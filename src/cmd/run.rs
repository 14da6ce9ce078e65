//! Foreground single-job command: `pagesmith run --job request.json`.

use std::path::Path;

use anyhow::{Context, Result, bail};

use pagesmith::models::JobRequest;
use pagesmith::orchestrator::{Pipeline, PipelineDeps, PipelineRunner};

use crate::Cli;

pub async fn cmd_run(cli: &Cli, job_path: &Path) -> Result<()> {
    let settings = super::resolve_settings(cli)?;

    let content = std::fs::read_to_string(job_path)
        .with_context(|| format!("Failed to read job file: {}", job_path.display()))?;
    let request: JobRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse job file: {}", job_path.display()))?;
    // The secret only authenticates HTTP submissions; a local file is trusted.
    let job = request.into_job()?;

    let deps = PipelineDeps::from_settings(&settings).await?;
    let runner = PipelineRunner::new(Pipeline::new(deps));
    let outcome = runner.run_to_completion(job).await?;

    println!();
    println!("Run {} ({} round {})", outcome.run_id, outcome.task, outcome.round);
    println!("  stage:    {}", outcome.stage);
    if let Some(url) = &outcome.repo_url {
        println!("  repo:     {}", url);
    }
    if let Some(url) = &outcome.pages_url {
        println!("  pages:    {}", url);
    }
    if let Some(sha) = &outcome.commit_sha {
        println!("  commit:   {}", sha);
    }
    if let Some(notify) = &outcome.notify {
        println!(
            "  notified: {} after {} attempt(s)",
            notify.delivered, notify.attempts
        );
    }

    if !outcome.is_done() {
        let stage = outcome
            .failed_stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        bail!(
            "Run aborted during {}: {}",
            stage,
            outcome.error.unwrap_or_default()
        );
    }
    Ok(())
}
