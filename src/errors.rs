//! Typed error hierarchy for the pagesmith pipeline.
//!
//! One enum per stage owner, plus the orchestrator's wrapper:
//! - `GenerationError`: text-generation backend failures
//! - `PublishError`: repository API failures (create, write, update)
//! - `HostingError`: static hosting activation failures
//! - `PipelineError`: run-level failures, wrapping the stage errors

use thiserror::Error;

/// Errors from the generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Generation service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("Generation transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Generation response had no content")]
    EmptyResponse,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the repository host.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Update of {path} rejected: content hash {sha} is stale")]
    Conflict { path: String, sha: String },

    #[error(
        "Repository {name} exists but was not created by pagesmith; refusing to delete it. \
         To let pagesmith replace it, set its description to 'pagesmith:{name}' or delete it yourself"
    )]
    Unmanaged { name: String },

    #[error("Repository API returned HTTP {status} for {action}: {body}")]
    Api {
        action: String,
        status: u16,
        body: String,
    },

    #[error("Repository API transport error during {action}: {source}")]
    Transport {
        action: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PublishError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from static hosting activation.
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("Enabling hosting for {repo} returned HTTP {status}, expected 201: {body}")]
    UnexpectedStatus {
        repo: String,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Run-level failures. Every fatal stage error ends up here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Publishing failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Hosting activation failed: {0}")]
    Hosting(#[from] HostingError),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("A run for task {task} is already in flight")]
    AlreadyRunning { task: String },

    #[error("Run cancelled before {stage}")]
    Cancelled { stage: String },
}
