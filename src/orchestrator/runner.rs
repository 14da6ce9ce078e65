use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::{BuildJob, RunRecord};

use super::state::{RunContext, RunRegistry};
use super::{Pipeline, RunOutcome};

/// Capacity of the finished-run broadcast channel.
const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// Runs pipeline jobs in the background.
///
/// Each accepted job gets its own tokio task, a child cancellation token and
/// a registry entry. The caller gets the run id back immediately; the
/// outcome is published on [`PipelineRunner::subscribe`] and recorded in the
/// registry once the run reaches a terminal state.
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    registry: Arc<RunRegistry>,
    outcomes: broadcast::Sender<RunOutcome>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl PipelineRunner {
    pub fn new(pipeline: Pipeline) -> Self {
        let (outcomes, _rx) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            pipeline: Arc::new(pipeline),
            registry: Arc::new(RunRegistry::new()),
            outcomes,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Accept `job` and start it on its own task. Returns without waiting
    /// for any stage to run.
    pub fn start_run(&self, job: BuildJob) -> Result<Uuid, PipelineError> {
        let (ctx, span) = self.admit(&job)?;
        let run_id = ctx.id;
        let pipeline = Arc::clone(&self.pipeline);
        let registry = Arc::clone(&self.registry);
        let outcomes = self.outcomes.clone();

        self.tracker.spawn(
            async move {
                let outcome = pipeline.execute(&job, &ctx).await;
                registry.finish(&outcome);
                // No subscribers is normal; the registry still has the record.
                let _ = outcomes.send(outcome);
            }
            .instrument(span),
        );

        tracing::info!(%run_id, "run accepted");
        Ok(run_id)
    }

    /// Run `job` on the current task and wait for its outcome.
    pub async fn run_to_completion(&self, job: BuildJob) -> Result<RunOutcome, PipelineError> {
        let (ctx, span) = self.admit(&job)?;
        let outcome = self.pipeline.execute(&job, &ctx).instrument(span).await;
        self.registry.finish(&outcome);
        let _ = self.outcomes.send(outcome.clone());
        Ok(outcome)
    }

    fn admit(&self, job: &BuildJob) -> Result<(RunContext, tracing::Span), PipelineError> {
        let run_id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        self.registry.begin(run_id, job, cancel.clone())?;
        let ctx = RunContext::new(run_id, cancel, Some(Arc::clone(&self.registry)));
        let span = tracing::info_span!("run", %run_id, task = %job.task, round = job.round);
        Ok((ctx, span))
    }

    /// Ask a run to stop at its next stage boundary.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let cancelled = self.registry.cancel(run_id);
        if cancelled {
            tracing::info!(%run_id, "cancellation requested");
        }
        cancelled
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunOutcome> {
        self.outcomes.subscribe()
    }

    pub fn run(&self, run_id: Uuid) -> Option<RunRecord> {
        self.registry.get(run_id)
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.registry.list()
    }

    /// Cancel every run at its next stage boundary and wait for all of them.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
