//! Job intake server command: `pagesmith serve`.

use std::sync::Arc;

use anyhow::Result;

use pagesmith::orchestrator::{Pipeline, PipelineDeps, PipelineRunner};
use pagesmith::server::{AppState, start_server};

use crate::Cli;

pub async fn cmd_serve(cli: &Cli, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut settings = super::resolve_settings(cli)?;
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }

    settings.require_secrets()?;
    for warning in settings.validate() {
        tracing::warn!("{}", warning);
    }

    let deps = PipelineDeps::from_settings(&settings).await?;
    let state = Arc::new(AppState {
        runner: PipelineRunner::new(Pipeline::new(deps)),
        shared_secret: settings.secrets.shared_secret.clone(),
    });

    start_server(state, &settings.bind_addr()).await
}
