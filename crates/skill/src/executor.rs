use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use echonet_grid::NodeRecord;

use crate::definition::{Params, PipelineState};
use crate::error::{Result, SkillError};
use crate::registry::LocalSkillRegistry;

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Body of a step-execution call between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub op: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub state: PipelineState,
}

/// Successful step-execution reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub state: PipelineState,
}

/// Runs skills from the local registry.
pub struct LocalExecutor {
    registry: Arc<LocalSkillRegistry>,
}

impl LocalExecutor {
    pub fn new(registry: Arc<LocalSkillRegistry>) -> Self {
        Self { registry }
    }

    /// Execute `op` against `state`.
    ///
    /// Errors and panics raised by the skill, and outputs that drop input
    /// keys, all come back as [`SkillError::LocalSkill`].
    pub async fn execute(&self, op: &str, state: PipelineState, params: &Params) -> Result<PipelineState> {
        let skill = self
            .registry
            .get(op)
            .ok_or_else(|| SkillError::local(op, "skill not implemented on this node"))?;

        let input_keys: Vec<String> = state.keys().cloned().collect();
        let start = Instant::now();
        debug!("Executing local skill: {}", op);

        let output = match AssertUnwindSafe(skill.execute(state, params)).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Skill {} execution failed: {}", op, e);
                return Err(SkillError::local(op, e.to_string()));
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("Skill {} panicked: {}", op, reason);
                return Err(SkillError::local(op, format!("panicked: {}", reason)));
            }
        };

        let dropped: Vec<&str> = input_keys
            .iter()
            .filter(|k| !output.contains_key(k.as_str()))
            .map(String::as_str)
            .collect();
        if !dropped.is_empty() {
            return Err(SkillError::local(op, format!("output dropped state keys {:?}", dropped)));
        }

        info!(
            "Skill {} executed successfully in {}ms",
            op,
            start.elapsed().as_millis()
        );
        Ok(output)
    }

    pub fn registry(&self) -> &LocalSkillRegistry {
        &self.registry
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sends a single step to another node.
///
/// The dispatcher only sees this seam, so a cancellable or streaming
/// transport can replace the blocking HTTP call without touching step
/// sequencing.
#[async_trait]
pub trait RemoteStepExecutor: Send + Sync {
    async fn execute_step(&self, node: &NodeRecord, request: &StepRequest) -> Result<PipelineState>;
}

/// `POST {node}/execute_step` over HTTP with a bounded timeout.
pub struct HttpRemoteExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRemoteExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpRemoteExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE_TIMEOUT)
    }
}

#[async_trait]
impl RemoteStepExecutor for HttpRemoteExecutor {
    async fn execute_step(&self, node: &NodeRecord, request: &StepRequest) -> Result<PipelineState> {
        let url = format!("{}/execute_step", node.base_url());
        let failed = |reason: String| SkillError::Remote {
            node: node.id.clone(),
            op: request.op.clone(),
            reason,
        };

        debug!("Forwarding op {} to {} at {}", request.op, node.id, url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("status {}: {}", status, body)));
        }

        let body: StepResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("malformed response: {}", e)))?;
        Ok(body.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::FnSkill;
    use serde_json::json;

    fn executor() -> LocalExecutor {
        let registry = LocalSkillRegistry::new()
            .with(
                "set_x",
                Arc::new(FnSkill::new(|mut s, _| {
                    s.insert("x".into(), json!(1));
                    Ok(s)
                })),
            )
            .with("boom", Arc::new(FnSkill::new(|_, _| Err("model offline".into()))))
            .with("wipe", Arc::new(FnSkill::new(|_, _| Ok(PipelineState::new()))))
            .with("panic", Arc::new(FnSkill::new(|_, _| panic!("bad index"))));
        LocalExecutor::new(Arc::new(registry))
    }

    fn state(value: serde_json::Value) -> PipelineState {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_executes_and_keeps_keys() {
        let out = executor()
            .execute("set_x", state(json!({"keep": true})), &Params::new())
            .await
            .unwrap();
        assert_eq!(out, state(json!({"keep": true, "x": 1})));
    }

    #[tokio::test]
    async fn test_missing_registration() {
        let err = executor()
            .execute("nope", PipelineState::new(), &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::LocalSkill { ref op, .. } if op == "nope"));
    }

    #[tokio::test]
    async fn test_skill_error_carries_message() {
        let err = executor()
            .execute("boom", PipelineState::new(), &Params::new())
            .await
            .unwrap_err();
        match err {
            SkillError::LocalSkill { op, reason } => {
                assert_eq!(op, "boom");
                assert_eq!(reason, "model offline");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let err = executor()
            .execute("panic", PipelineState::new(), &Params::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad index"));
    }

    #[tokio::test]
    async fn test_dropping_keys_is_rejected() {
        let err = executor()
            .execute("wipe", state(json!({"keep": 1})), &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "local_skill_error");
        assert!(err.to_string().contains("keep"));
    }
}
