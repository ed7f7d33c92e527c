//! Skills every node ships with.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use echonet_skill::{LocalSkillRegistry, Params, PipelineState, SkillFailure, StepExecutor};

pub const BUILTIN_SKILLS: &[&str] = &["echo", "uppercase"];

/// Copies its params into the state.
pub struct EchoSkill;

#[async_trait]
impl StepExecutor for EchoSkill {
    async fn execute(
        &self,
        mut state: PipelineState,
        params: &Params,
    ) -> Result<PipelineState, SkillFailure> {
        for (key, value) in params {
            state.insert(key.clone(), value.clone());
        }
        Ok(state)
    }
}

/// Upper-cases the string state field named by `params.field`.
pub struct UppercaseSkill;

#[async_trait]
impl StepExecutor for UppercaseSkill {
    async fn execute(
        &self,
        mut state: PipelineState,
        params: &Params,
    ) -> Result<PipelineState, SkillFailure> {
        let field = params
            .get("field")
            .and_then(Value::as_str)
            .ok_or("params.field must name a state field")?;

        let upper = match state.get(field) {
            Some(Value::String(s)) => s.to_uppercase(),
            Some(_) => return Err(format!("state field {} is not a string", field).into()),
            None => return Err(format!("state has no field {}", field).into()),
        };
        state.insert(field.to_string(), Value::String(upper));
        Ok(state)
    }
}

/// Registry holding the built-in skills named in `enabled`.
pub fn builtin_registry(enabled: &[String]) -> LocalSkillRegistry {
    let mut registry = LocalSkillRegistry::new();
    for name in enabled {
        match name.as_str() {
            "echo" => registry.register(name, Arc::new(EchoSkill)),
            "uppercase" => registry.register(name, Arc::new(UppercaseSkill)),
            _ => {}
        }
    }
    registry
}
