use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use echonet_grid::LoadGauge;

use crate::definition::{PipelineState, PipelineStep};
use crate::error::SkillError;
use crate::executor::{LocalExecutor, RemoteStepExecutor, StepRequest};
use crate::router::{SkillRouter, Target};
use crate::task::{StepFailure, TaskId, TaskStore};

/// Result of submitting a pipeline through [`PipelineDispatcher::submit`].
#[derive(Debug)]
pub struct Submission {
    pub task_id: TaskId,
    pub outcome: std::result::Result<PipelineState, StepFailure>,
}

/// Walks a pipeline step by step, running each one locally or on the peer
/// that declares its op.
pub struct PipelineDispatcher {
    router: Arc<SkillRouter>,
    local: Arc<LocalExecutor>,
    remote: Arc<dyn RemoteStepExecutor>,
    load: LoadGauge,
}

impl PipelineDispatcher {
    pub fn new(
        router: Arc<SkillRouter>,
        local: Arc<LocalExecutor>,
        remote: Arc<dyn RemoteStepExecutor>,
        load: LoadGauge,
    ) -> Self {
        Self {
            router,
            local,
            remote,
            load,
        }
    }

    pub fn router(&self) -> &Arc<SkillRouter> {
        &self.router
    }

    pub fn local(&self) -> &Arc<LocalExecutor> {
        &self.local
    }

    /// Record a task in `tasks`, run it to completion and record the outcome.
    ///
    /// The pipeline runs on its own tokio task, so the task still reaches a
    /// terminal status if the returned future is dropped midway.
    pub async fn submit(
        self: &Arc<Self>,
        tasks: &Arc<TaskStore>,
        owner_token: &str,
        pipeline: Vec<PipelineStep>,
        initial: PipelineState,
    ) -> Submission {
        let task_id = tasks.create(owner_token, pipeline.clone());
        info!("Task {} submitted with {} steps", task_id, pipeline.len());

        let first_op = pipeline.first().map(|s| s.op.clone()).unwrap_or_default();
        let dispatcher = Arc::clone(self);
        let store = Arc::clone(tasks);
        let handle = tokio::spawn(async move {
            let outcome = dispatcher.run(&pipeline, initial).await;
            match &outcome {
                Ok(state) => {
                    store.complete(&task_id, state.clone());
                }
                Err(failure) => {
                    error!("Task {} failed: {}", task_id, failure);
                    store.fail(&task_id, failure.clone());
                }
            }
            outcome
        });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Task {} aborted: {}", task_id, e);
                let failure = StepFailure {
                    step: 0,
                    op: first_op.clone(),
                    node: None,
                    error: SkillError::local(first_op, format!("task aborted: {}", e)),
                };
                tasks.fail(&task_id, failure.clone());
                Err(failure)
            }
        };

        Submission { task_id, outcome }
    }

    /// Execute `pipeline` against `initial`, returning the final state.
    ///
    /// Every op must have an owner before the first step runs. Steps then
    /// run strictly in order, each on the previous step's output; the first
    /// failure aborts the pipeline and the partial state is dropped.
    pub async fn run(
        &self,
        pipeline: &[PipelineStep],
        initial: PipelineState,
    ) -> std::result::Result<PipelineState, StepFailure> {
        let _load = self.load.acquire();
        let start = Instant::now();

        self.preflight(pipeline)?;

        let mut state = initial;
        for (index, step) in pipeline.iter().enumerate() {
            state = self.run_step(index, step, state).await?;
        }

        info!(
            "Pipeline of {} steps completed in {}ms",
            pipeline.len(),
            start.elapsed().as_millis()
        );
        Ok(state)
    }

    fn preflight(&self, pipeline: &[PipelineStep]) -> std::result::Result<(), StepFailure> {
        for (index, step) in pipeline.iter().enumerate() {
            self.router
                .resolve(&step.op, step.target_node.as_ref())
                .map_err(|error| StepFailure {
                    step: index,
                    op: step.op.clone(),
                    node: None,
                    error,
                })?;
        }
        Ok(())
    }

    async fn run_step(
        &self,
        index: usize,
        step: &PipelineStep,
        state: PipelineState,
    ) -> std::result::Result<PipelineState, StepFailure> {
        let fail = |node, error| StepFailure {
            step: index,
            op: step.op.clone(),
            node,
            error,
        };

        // Re-resolve: peers may have expired since preflight.
        let decision = self
            .router
            .resolve(&step.op, step.target_node.as_ref())
            .map_err(|e| fail(None, e))?;
        debug!("Step {} ({}) -> {}", index, step.op, decision.node);

        let result = match &decision.target {
            Target::Local => self.local.execute(&step.op, state, &step.params).await,
            Target::Remote(peer) => {
                let request = StepRequest {
                    op: step.op.clone(),
                    params: step.params.clone(),
                    state,
                };
                self.remote.execute_step(peer, &request).await
            }
        };

        result.map_err(|e| fail(Some(decision.node.clone()), e))
    }
}
