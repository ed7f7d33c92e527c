pub mod definition;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod plan;
pub mod registry;
pub mod router;
pub mod task;

pub use definition::{FnSkill, Params, PipelineState, PipelineStep, SkillFailure, StepExecutor};
pub use dispatcher::{PipelineDispatcher, Submission};
pub use error::{AuthFailure, Result, SkillError};
pub use executor::{
    HttpRemoteExecutor, LocalExecutor, RemoteStepExecutor, StepRequest, StepResponse,
    DEFAULT_REMOTE_TIMEOUT,
};
pub use plan::{parse_plan_text, PlanValidator};
pub use registry::LocalSkillRegistry;
pub use router::{RouteDecision, SelectionPolicy, SkillRouter, Target};
pub use task::{StepFailure, Task, TaskId, TaskStatus, TaskStore, TaskView};
