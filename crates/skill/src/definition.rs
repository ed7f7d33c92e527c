use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use echonet_grid::NodeId;

/// State threaded through a pipeline, step to step.
pub type PipelineState = Map<String, Value>;

/// Per-step parameters.
pub type Params = Map<String, Value>;

/// Error a skill implementation may return.
pub type SkillFailure = Box<dyn std::error::Error + Send + Sync>;

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Capability name
    pub op: String,
    #[serde(default)]
    pub params: Params,
    /// Explicit routing override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<NodeId>,
}

impl PipelineStep {
    pub fn new(op: &str) -> Self {
        Self {
            op: op.to_string(),
            params: Params::new(),
            target_node: None,
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_target(mut self, node: &str) -> Self {
        self.target_node = Some(NodeId::new(node));
        self
    }
}

/// A capability this node can execute.
///
/// Implementations receive the whole state and return the next one. The
/// returned state must keep every key of the input; it may add keys or
/// overwrite the ones the skill owns.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        state: PipelineState,
        params: &Params,
    ) -> std::result::Result<PipelineState, SkillFailure>;
}

/// Adapts a synchronous closure into a [`StepExecutor`].
pub struct FnSkill<F>(F);

impl<F> FnSkill<F>
where
    F: Fn(PipelineState, &Params) -> std::result::Result<PipelineState, SkillFailure>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> StepExecutor for FnSkill<F>
where
    F: Fn(PipelineState, &Params) -> std::result::Result<PipelineState, SkillFailure>
        + Send
        + Sync,
{
    async fn execute(
        &self,
        state: PipelineState,
        params: &Params,
    ) -> std::result::Result<PipelineState, SkillFailure> {
        (self.0)(state, params)
    }
}
