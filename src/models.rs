use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::util::is_valid_repo_name;

/// Entry document every published repository serves.
pub const ENTRY_FILE: &str = "index.html";
pub const LICENSE_FILE: &str = "LICENSE";
pub const README_FILE: &str = "README.md";

/// An attachment as it arrives on the wire: a name and a `data:` URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// Inbound job request body, before authentication and validation.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub secret: String,
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub brief: String,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub evaluation_url: String,
}

impl JobRequest {
    /// Validate the request and turn it into a `BuildJob`.
    ///
    /// The secret is not checked here; the dispatcher does that before
    /// calling this so a bad secret never reaches validation.
    pub fn into_job(self) -> Result<BuildJob, PipelineError> {
        if !is_valid_repo_name(&self.task) {
            return Err(PipelineError::InvalidJob(format!(
                "task '{}' is not a valid repository name",
                self.task
            )));
        }
        if self.round == 0 {
            return Err(PipelineError::InvalidJob(
                "round must be 1 or greater".to_string(),
            ));
        }
        let url = self.evaluation_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PipelineError::InvalidJob(format!(
                "evaluation_url '{}' is not an http(s) URL",
                self.evaluation_url
            )));
        }

        Ok(BuildJob {
            task: self.task,
            brief: self.brief,
            checks: self.checks,
            attachments: self.attachments,
            round: self.round,
            email: self.email,
            nonce: self.nonce,
            evaluation_url: url.to_string(),
        })
    }
}

/// One validated pipeline run's input. Immutable once accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildJob {
    /// Also the repository name.
    pub task: String,
    pub brief: String,
    pub checks: Vec<String>,
    pub attachments: Vec<Attachment>,
    /// 1 = initial build, 2+ = revision.
    pub round: u32,
    pub email: String,
    pub nonce: String,
    pub evaluation_url: String,
}

impl BuildJob {
    pub fn is_revision(&self) -> bool {
        self.round >= 2
    }
}

/// Sanitized document produced by the generation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact(String);

impl GeneratedArtifact {
    pub fn new(document: impl Into<String>) -> Self {
        Self(document.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reference to a published repository plus the content hash of each
/// tracked file. Updates must present the recorded hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepositoryHandle {
    pub owner: String,
    pub name: String,
    pub html_url: String,
    pub default_branch: String,
    /// path → blob sha
    pub files: BTreeMap<String, String>,
    /// Sha of the most recent commit this service made or observed.
    pub commit_sha: String,
}

impl RepositoryHandle {
    pub fn sha_of(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Record a successful write of `path`.
    pub fn record_write(&mut self, path: &str, blob_sha: String, commit_sha: String) {
        self.files.insert(path.to_string(), blob_sha);
        self.commit_sha = commit_sha;
    }
}

/// Completion report sent to the caller's evaluation URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

impl NotificationPayload {
    pub fn for_run(job: &BuildJob, handle: &RepositoryHandle, pages_url: &str) -> Self {
        Self {
            email: job.email.clone(),
            task: job.task.clone(),
            round: job.round,
            nonce: job.nonce.clone(),
            repo_url: handle.html_url.clone(),
            commit_sha: handle.commit_sha.clone(),
            pages_url: pages_url.to_string(),
        }
    }
}

/// Pipeline stage a run is in. `Done` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Queued,
    Fetching,
    Generating,
    Publishing,
    ActivatingHosting,
    Updating,
    Notifying,
    Done,
    Aborted,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Generating => "generating",
            Self::Publishing => "publishing",
            Self::ActivatingHosting => "activating_hosting",
            Self::Updating => "updating",
            Self::Notifying => "notifying",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "fetching" => Ok(Self::Fetching),
            "generating" => Ok(Self::Generating),
            "publishing" => Ok(Self::Publishing),
            "activating_hosting" => Ok(Self::ActivatingHosting),
            "updating" => Ok(Self::Updating),
            "notifying" => Ok(Self::Notifying),
            "done" => Ok(Self::Done),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid run stage: {}", s)),
        }
    }
}

/// Operational view of one run, served by the run endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub task: String,
    pub round: u32,
    pub stage: RunStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub repo_url: Option<String>,
    pub pages_url: Option<String>,
    pub notified: Option<bool>,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(id: Uuid, job: &BuildJob) -> Self {
        Self {
            id,
            task: job.task.clone(),
            round: job.round,
            stage: RunStage::Queued,
            started_at: Utc::now(),
            finished_at: None,
            repo_url: None,
            pages_url: None,
            notified: None,
            error: None,
        }
    }
}
