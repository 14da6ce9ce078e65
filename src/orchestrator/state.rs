use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::{BuildJob, RunRecord, RunStage};

use super::RunOutcome;

/// Finished runs kept for the run endpoints before the oldest are dropped.
const MAX_FINISHED_RUNS: usize = 1_000;

/// Per-run handle threaded through every stage.
///
/// Stage transitions go through [`RunContext::enter`], which is also the only
/// place cancellation is observed: an outbound call that has started always
/// runs to completion.
pub struct RunContext {
    pub id: Uuid,
    cancel: CancellationToken,
    stage: Mutex<RunStage>,
    registry: Option<Arc<RunRegistry>>,
}

impl RunContext {
    pub fn new(id: Uuid, cancel: CancellationToken, registry: Option<Arc<RunRegistry>>) -> Self {
        Self {
            id,
            cancel,
            stage: Mutex::new(RunStage::Queued),
            registry,
        }
    }

    /// Context with no registry and a token nobody else holds.
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4(), CancellationToken::new(), None)
    }

    pub fn stage(&self) -> RunStage {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next`, unless the run was cancelled.
    pub fn enter(&self, next: RunStage) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                stage: next.to_string(),
            });
        }
        self.set_stage(next);
        tracing::info!(stage = %next, "stage started");
        Ok(())
    }

    /// Move to `next` regardless of cancellation. Used once the run's side
    /// effects are live and only reporting is left.
    pub fn enter_committed(&self, next: RunStage) {
        self.set_stage(next);
        tracing::info!(stage = %next, "stage started");
    }

    /// Move to `Done` or `Aborted`. Cancellation no longer matters here.
    pub fn enter_terminal(&self, last: RunStage) {
        debug_assert!(last.is_terminal());
        self.set_stage(last);
    }

    fn set_stage(&self, next: RunStage) {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner) = next;
        if let Some(registry) = &self.registry {
            registry.set_stage(self.id, next);
        }
    }
}

#[derive(Default)]
struct RegistryState {
    runs: HashMap<Uuid, RunRecord>,
    /// task name → in-flight run
    active: HashMap<String, Uuid>,
    cancels: HashMap<Uuid, CancellationToken>,
}

/// In-memory view of every run this process has started.
#[derive(Default)]
pub struct RunRegistry {
    state: Mutex<RegistryState>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new run. At most one run per task name may be in flight.
    pub fn begin(
        &self,
        id: Uuid,
        job: &BuildJob,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut state = self.lock();
        if state.active.contains_key(&job.task) {
            return Err(PipelineError::AlreadyRunning {
                task: job.task.clone(),
            });
        }
        state.active.insert(job.task.clone(), id);
        state.cancels.insert(id, cancel);
        state.runs.insert(id, RunRecord::new(id, job));
        prune_finished(&mut state);
        Ok(())
    }

    pub fn set_stage(&self, id: Uuid, stage: RunStage) {
        if let Some(record) = self.lock().runs.get_mut(&id) {
            record.stage = stage;
        }
    }

    /// Record a run's terminal state and release its task name.
    pub fn finish(&self, outcome: &RunOutcome) {
        let mut state = self.lock();
        if state.active.get(&outcome.task) == Some(&outcome.run_id) {
            state.active.remove(&outcome.task);
        }
        state.cancels.remove(&outcome.run_id);
        if let Some(record) = state.runs.get_mut(&outcome.run_id) {
            record.stage = outcome.stage;
            record.finished_at = Some(Utc::now());
            record.repo_url = outcome.repo_url.clone();
            record.pages_url = outcome.pages_url.clone();
            record.notified = outcome.notify.map(|n| n.delivered);
            record.error = outcome.error.clone();
        }
    }

    /// Request cancellation at the run's next stage boundary.
    /// Returns false if the run is unknown or already finished.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.lock().cancels.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<RunRecord> {
        self.lock().runs.get(&id).cloned()
    }

    /// All known runs, newest first.
    pub fn list(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.lock().runs.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    pub fn is_active(&self, task: &str) -> bool {
        self.lock().active.contains_key(task)
    }
}

fn prune_finished(state: &mut RegistryState) {
    let finished = state.runs.values().filter(|r| r.stage.is_terminal()).count();
    if finished <= MAX_FINISHED_RUNS {
        return;
    }
    let mut oldest: Vec<(chrono::DateTime<Utc>, Uuid)> = state
        .runs
        .values()
        .filter(|r| r.stage.is_terminal())
        .map(|r| (r.finished_at.unwrap_or(r.started_at), r.id))
        .collect();
    oldest.sort();
    for (_, id) in oldest.into_iter().take(finished - MAX_FINISHED_RUNS) {
        state.runs.remove(&id);
    }
}
