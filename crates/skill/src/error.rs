use echonet_grid::NodeId;
use thiserror::Error;

/// Why a credential was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("missing credential")]
    Missing,
    #[error("invalid token")]
    Invalid,
    #[error("forbidden")]
    Forbidden,
}

/// Everything that can abort a task or reject a request.
#[derive(Error, Debug, Clone)]
pub enum SkillError {
    /// Malformed request or pipeline shape
    #[error("validation error: {0}")]
    Validation(String),

    /// No node advertises the op
    #[error("no node can handle op={op}")]
    Capability { op: String },

    #[error("auth error: {0}")]
    Auth(AuthFailure),

    #[error("task not found: {0}")]
    NotFound(String),

    /// Transport failure, timeout or bad response from a peer
    #[error("remote node {node} failed on op={op}: {reason}")]
    Remote {
        node: NodeId,
        op: String,
        reason: String,
    },

    /// Missing registration, error or panic in a local skill
    #[error("local skill {op} failed: {reason}")]
    LocalSkill { op: String, reason: String },

    /// Planner output is not valid structured data
    #[error("failed to parse plan: {0}")]
    Parse(String),
}

impl SkillError {
    pub fn capability(op: impl Into<String>) -> Self {
        SkillError::Capability { op: op.into() }
    }

    pub fn local(op: impl Into<String>, reason: impl Into<String>) -> Self {
        SkillError::LocalSkill {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable classification.
    pub fn kind(&self) -> &'static str {
        match self {
            SkillError::Validation(_) => "validation_error",
            SkillError::Capability { .. } => "capability_error",
            SkillError::Auth(_) => "auth_error",
            SkillError::NotFound(_) => "not_found",
            SkillError::Remote { .. } => "remote_error",
            SkillError::LocalSkill { .. } => "local_skill_error",
            SkillError::Parse(_) => "parse_error",
        }
    }

    pub fn op(&self) -> Option<&str> {
        match self {
            SkillError::Capability { op }
            | SkillError::Remote { op, .. }
            | SkillError::LocalSkill { op, .. } => Some(op),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SkillError>;
