//! Pipeline orchestrator.
//!
//! ## Workflows
//!
//! ```text
//! round 1:  Generating ─> Publishing ─> ActivatingHosting ─> Notifying ─> Done
//! round 2+: Fetching ─> Generating ─> Updating ─────────────> Notifying ─> Done
//!                 any fatal stage error ─> Aborted
//! ```
//!
//! Every stage before `Notifying` is fail-fast: the first error aborts the
//! run and is logged with the stage it happened in. Notification is
//! best-effort and never turns a published run into a failed one.
//! Cancellation is observed at each boundary up to `Notifying`; once the
//! site is live the run always reports.
//!
//! [`Pipeline`] runs a single job to completion on the caller's task.
//! [`PipelineRunner`] wraps it with background execution, cancellation and
//! the run registry used by the HTTP dispatcher.

pub mod runner;
pub mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::config::Settings;
use crate::errors::PipelineError;
use crate::generator::Generator;
use crate::github::{GitHubClient, RepoHost};
use crate::hosting::{HostingActivator, pages_url};
use crate::llm::{ChatBackend, OpenAiChatClient};
use crate::models::{BuildJob, NotificationPayload, RepositoryHandle, RunStage};
use crate::notify::{CallbackNotifier, CallbackSink, HttpCallbackSink, NotifyOutcome, RetryPolicy};
use crate::publisher::RepositoryPublisher;

pub use runner::PipelineRunner;
pub use state::{RunContext, RunRegistry};

/// Explicitly constructed clients the pipeline owns.
pub struct PipelineDeps {
    pub chat: Arc<dyn ChatBackend>,
    pub repo_host: Arc<dyn RepoHost>,
    pub callback: Arc<dyn CallbackSink>,
    pub retry: RetryPolicy,
    /// License template key, e.g. `mit`.
    pub license_key: String,
}

impl PipelineDeps {
    /// Build the production clients. Resolves the repository owner from the
    /// token when none is configured.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        settings.require_client_secrets()?;
        let token = settings.secrets.github_token.clone();

        let owner = match &settings.github.owner {
            Some(owner) => owner.clone(),
            None => GitHubClient::resolve_owner(&settings.github.api_url, &token)
                .await
                .context("Failed to resolve GitHub owner from GITHUB_TOKEN")?,
        };
        tracing::info!(owner = %owner, "publishing as GitHub owner");

        Ok(Self {
            chat: Arc::new(OpenAiChatClient::new(
                &settings.llm.base_url,
                settings.secrets.llm_api_key.clone(),
                &settings.llm.model,
                settings.llm_timeout(),
            )),
            repo_host: Arc::new(GitHubClient::new(&settings.github.api_url, token, owner)),
            callback: Arc::new(HttpCallbackSink::new(settings.notify_timeout())),
            retry: settings.retry_policy(),
            license_key: settings.github.license.clone(),
        })
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub task: String,
    pub round: u32,
    /// `Done` or `Aborted`.
    pub stage: RunStage,
    /// Stage the run was in when it aborted.
    pub failed_stage: Option<RunStage>,
    pub repo_url: Option<String>,
    pub pages_url: Option<String>,
    pub commit_sha: Option<String>,
    pub notify: Option<NotifyOutcome>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.stage == RunStage::Done
    }
}

/// What a workflow produced before notification.
struct Published {
    handle: RepositoryHandle,
    pages_url: String,
}

pub struct Pipeline {
    generator: Generator,
    publisher: RepositoryPublisher,
    hosting: HostingActivator,
    notifier: CallbackNotifier,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        let generator = Generator::new(deps.chat);
        Self {
            publisher: RepositoryPublisher::new(
                Arc::clone(&deps.repo_host),
                generator.clone(),
                &deps.license_key,
            ),
            hosting: HostingActivator::new(deps.repo_host),
            notifier: CallbackNotifier::new(deps.callback, deps.retry),
            generator,
        }
    }

    /// Run `job` to a terminal state. Never fails: an abort is reported in
    /// the returned outcome and in the logs.
    pub async fn execute(&self, job: &BuildJob, ctx: &RunContext) -> RunOutcome {
        let result = if job.is_revision() {
            self.run_revision(job, ctx).await
        } else {
            self.run_build(job, ctx).await
        };

        let published = match result {
            Ok(published) => published,
            Err(e) => return self.aborted(job, ctx, e),
        };

        // The site is live; a late cancellation must not suppress the report.
        ctx.enter_committed(RunStage::Notifying);
        let payload = NotificationPayload::for_run(job, &published.handle, &published.pages_url);
        let notify = self.notifier.notify(&payload, &job.evaluation_url).await;

        ctx.enter_terminal(RunStage::Done);
        tracing::info!(
            pages_url = %published.pages_url,
            notified = notify.delivered,
            "run complete"
        );
        RunOutcome {
            run_id: ctx.id,
            task: job.task.clone(),
            round: job.round,
            stage: RunStage::Done,
            failed_stage: None,
            repo_url: Some(published.handle.html_url),
            pages_url: Some(published.pages_url),
            commit_sha: Some(published.handle.commit_sha),
            notify: Some(notify),
            error: None,
        }
    }

    /// Round 1: generate, publish into a fresh repository, enable hosting.
    async fn run_build(&self, job: &BuildJob, ctx: &RunContext) -> Result<Published, PipelineError> {
        ctx.enter(RunStage::Generating)?;
        let document = self
            .generator
            .generate(&job.brief, &job.checks, &job.attachments)
            .await?;

        ctx.enter(RunStage::Publishing)?;
        let handle = self.publisher.create_and_publish(job, &document).await?;

        ctx.enter(RunStage::ActivatingHosting)?;
        let pages_url = self.hosting.activate(&handle).await?;

        Ok(Published { handle, pages_url })
    }

    /// Round 2+: revise the published document in place. Hosting was enabled
    /// in round 1, so the URL is derived rather than re-activated.
    async fn run_revision(
        &self,
        job: &BuildJob,
        ctx: &RunContext,
    ) -> Result<Published, PipelineError> {
        ctx.enter(RunStage::Fetching)?;
        let site = self.publisher.fetch_existing(&job.task).await?;

        ctx.enter(RunStage::Generating)?;
        let document = self
            .generator
            .revise(&job.brief, &site.document, &job.checks, &job.attachments)
            .await?;

        ctx.enter(RunStage::Updating)?;
        let readme = self
            .publisher
            .readme_for(&job.task, &job.brief, document.as_str(), Some(&site.readme))
            .await;
        let handle = self
            .publisher
            .update_in_place(&site.handle, &document, &readme, job.round)
            .await?;

        let pages_url = pages_url(&handle.owner, &handle.name);
        Ok(Published { handle, pages_url })
    }

    fn aborted(&self, job: &BuildJob, ctx: &RunContext, err: PipelineError) -> RunOutcome {
        let failed_stage = ctx.stage();
        tracing::error!(stage = %failed_stage, error = %err, "run aborted");
        ctx.enter_terminal(RunStage::Aborted);
        RunOutcome {
            run_id: ctx.id,
            task: job.task.clone(),
            round: job.round,
            stage: RunStage::Aborted,
            failed_stage: Some(failed_stage),
            repo_url: None,
            pages_url: None,
            commit_sha: None,
            notify: None,
            error: Some(err.to_string()),
        }
    }
}
