use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use echonet_grid::NodeId;

use crate::definition::{PipelineState, PipelineStep};
use crate::error::{AuthFailure, Result, SkillError};

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Which step aborted a pipeline, and why.
#[derive(Error, Debug, Clone)]
#[error("step {step} (op={op}) failed: {error}")]
pub struct StepFailure {
    /// Zero-based index into the pipeline
    pub step: usize,
    pub op: String,
    /// Node the step was routed to, if routing got that far
    pub node: Option<NodeId>,
    pub error: SkillError,
}

/// One submitted pipeline execution.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    owner_token: String,
    pub pipeline: Vec<PipelineStep>,
    pub final_state: Option<PipelineState>,
    pub status: TaskStatus,
    pub failure: Option<StepFailure>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Task {
    fn new(owner_token: &str, pipeline: Vec<PipelineStep>) -> Self {
        let now = unix_now();
        Self {
            id: TaskId::new(),
            owner_token: owner_token.to_string(),
            pipeline,
            final_state: None,
            status: TaskStatus::Running,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, token: &str) -> bool {
        self.owner_token == token
    }
}

/// What an owner may see of a task.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub final_state: Option<PipelineState>,
    pub failure: Option<StepFailure>,
}

/// Process-resident table of submitted tasks, keyed by id and guarded by
/// owner token.
#[derive(Default)]
pub struct TaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new running task; its id is valid for lookup on return.
    pub fn create(&self, owner_token: &str, pipeline: Vec<PipelineStep>) -> TaskId {
        let task = Task::new(owner_token, pipeline);
        let id = task.id;
        debug!("Created task {} with {} steps", id, task.pipeline.len());
        self.tasks.insert(id, task);
        id
    }

    /// Mark a running task done. Returns false if it is unknown or already terminal.
    pub fn complete(&self, id: &TaskId, final_state: PipelineState) -> bool {
        self.finish(id, |task| {
            task.status = TaskStatus::Done;
            task.final_state = Some(final_state);
        })
    }

    /// Mark a running task failed, discarding any partial state.
    pub fn fail(&self, id: &TaskId, failure: StepFailure) -> bool {
        self.finish(id, |task| {
            task.status = TaskStatus::Failed;
            task.final_state = None;
            task.failure = Some(failure);
        })
    }

    fn finish(&self, id: &TaskId, apply: impl FnOnce(&mut Task)) -> bool {
        let Some(mut task) = self.tasks.get_mut(id) else {
            return false;
        };
        if task.status.is_terminal() {
            return false;
        }
        apply(&mut task);
        task.updated_at = unix_now();
        info!("Task {} is {:?}", id, task.status);
        true
    }

    /// Look up a task for `requester_token`.
    ///
    /// Ids that do not parse are treated as unknown.
    pub fn get(&self, task_id: &str, requester_token: &str) -> Result<TaskView> {
        let not_found = || SkillError::NotFound(task_id.to_string());
        let id = TaskId::from_str(task_id).map_err(|_| not_found())?;
        let task = self.tasks.get(&id).ok_or_else(not_found)?;

        if !task.is_owned_by(requester_token) {
            return Err(SkillError::Auth(AuthFailure::Forbidden));
        }

        Ok(TaskView {
            task_id: task.id,
            status: task.status,
            final_state: task.final_state.clone(),
            failure: task.failure.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks not yet done or failed.
    pub fn running(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    /// Drop every task.
    pub fn clear(&self) {
        self.tasks.clear();
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
