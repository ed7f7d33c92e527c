//! Certifies planner-produced pipelines before they reach the dispatcher.
//!
//! Candidates have the shape `{"tasks": [{"op", "params"?, "target_node"?}, ...]}`.
//! Entries without a `target_node` are assigned one by capability lookup,
//! then every entry is checked against what the network currently offers.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use echonet_grid::NodeId;

use crate::definition::{Params, PipelineStep};
use crate::error::{Result, SkillError};
use crate::router::SkillRouter;

/// Pull a JSON object out of raw planner text.
///
/// The whole text is tried first, then the span from the first `{` to the
/// last `}` to tolerate prose or code fences around the object.
pub fn parse_plan_text(text: &str) -> Result<Value> {
    let text = text.trim();
    let parsed = serde_json::from_str::<Value>(text).ok().or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&text[start..=end]).ok()
    });

    let value = parsed.ok_or_else(|| SkillError::Parse("no JSON object in planner output".into()))?;
    if !value.get("tasks").is_some_and(Value::is_array) {
        return Err(SkillError::Parse("parsed output missing tasks list".into()));
    }
    Ok(value)
}

pub struct PlanValidator {
    router: Arc<SkillRouter>,
}

impl PlanValidator {
    pub fn new(router: Arc<SkillRouter>) -> Self {
        Self { router }
    }

    /// Validate `candidate` and return it as a fully routed pipeline.
    ///
    /// Fails on the first offending entry.
    pub fn validate(&self, candidate: &Value) -> Result<Vec<PipelineStep>> {
        let tasks = candidate
            .as_object()
            .ok_or_else(|| invalid("plan is not a JSON object"))?
            .get("tasks")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("tasks must be a list"))?;

        let catalogue = self.router.skill_catalogue();
        let mut steps = Vec::with_capacity(tasks.len());

        for (i, entry) in tasks.iter().enumerate() {
            let entry = entry
                .as_object()
                .ok_or_else(|| invalid(format!("task[{i}] is not an object")))?;

            let op = entry
                .get("op")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(format!("task[{i}].op missing or not a string")))?;

            let target = match entry.get("target_node") {
                None | Some(Value::Null) => {
                    let decision = self.router.resolve(op, None)?;
                    debug!("task[{}] auto-assigned to {}", i, decision.node);
                    decision.node
                }
                Some(Value::String(id)) => NodeId::new(id.as_str()),
                Some(_) => return Err(invalid(format!("task[{i}].target_node must be a string"))),
            };

            if !catalogue.contains(op) {
                return Err(invalid(format!(
                    "task[{i}].op \"{op}\" not in allowed operations"
                )));
            }

            let params = match entry.get("params") {
                None | Some(Value::Null) => Params::new(),
                Some(Value::Object(params)) => params.clone(),
                Some(_) => return Err(invalid(format!("task[{i}].params must be an object"))),
            };

            if !self.router.knows_node(target.as_str()) {
                return Err(invalid(format!(
                    "task[{i}].target_node \"{target}\" not a known node"
                )));
            }
            if !self.router.node_declares(target.as_str(), op) {
                return Err(invalid(format!(
                    "task[{i}].target_node \"{target}\" does not declare op \"{op}\""
                )));
            }

            steps.push(PipelineStep {
                op: op.to_string(),
                params,
                target_node: Some(target),
            });
        }

        Ok(steps)
    }
}

fn invalid(reason: impl Into<String>) -> SkillError {
    SkillError::Validation(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use echonet_grid::{NodeRecord, PeerDirectory, DEFAULT_PEER_TTL};
    use serde_json::json;

    fn validator() -> PlanValidator {
        let directory = Arc::new(PeerDirectory::new(NodeId::new("nodeA"), DEFAULT_PEER_TTL));
        directory.upsert(
            NodeRecord::new(NodeId::new("nodeB"), "10.0.0.3".parse().unwrap(), 5000)
                .with_skills(["translate_zh"]),
        );
        let router = SkillRouter::new(["generate_poem_en"], directory);
        PlanValidator::new(Arc::new(router))
    }

    #[test]
    fn test_auto_fills_targets() {
        let plan = json!({"tasks": [
            {"id": "1", "op": "generate_poem_en", "params": {"prompt": "sea"}},
            {"op": "translate_zh"}
        ]});
        let steps = validator().validate(&plan).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].target_node, Some(NodeId::new("nodeA")));
        assert_eq!(steps[0].params["prompt"], json!("sea"));
        assert_eq!(steps[1].target_node, Some(NodeId::new("nodeB")));
    }

    #[test]
    fn test_rejects_unknown_op() {
        let with_target = json!({"tasks": [{"op": "fly", "target_node": "nodeB"}]});
        let err = validator().validate(&with_target).unwrap_err();
        assert!(matches!(err, SkillError::Validation(ref m) if m.contains("task[0].op")));

        let without_target = json!({"tasks": [{"op": "fly"}]});
        let err = validator().validate(&without_target).unwrap_err();
        assert!(matches!(err, SkillError::Capability { ref op } if op == "fly"));
    }

    #[test]
    fn test_rejects_target_without_skill() {
        let plan = json!({"tasks": [{"op": "generate_poem_en", "target_node": "nodeB"}]});
        let err = validator().validate(&plan).unwrap_err();
        assert!(matches!(err, SkillError::Validation(ref m) if m.contains("does not declare")));
    }

    #[test]
    fn test_rejects_unknown_target() {
        let plan = json!({"tasks": [{"op": "translate_zh", "target_node": "nodeZ"}]});
        let err = validator().validate(&plan).unwrap_err();
        assert!(matches!(err, SkillError::Validation(ref m) if m.contains("not a known node")));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let v = validator();
        for (plan, needle) in [
            (json!([1, 2]), "not a JSON object"),
            (json!({"tasks": "x"}), "tasks must be a list"),
            (json!({"tasks": [{"op": "translate_zh"}, 7]}), "task[1] is not an object"),
            (json!({"tasks": [{"op": 3}]}), "task[0].op"),
            (json!({"tasks": [{"op": "translate_zh", "params": []}]}), "params"),
        ] {
            let err = v.validate(&plan).unwrap_err();
            assert!(err.to_string().contains(needle), "{err} lacks {needle}");
        }
    }

    #[test]
    fn test_parse_plan_text() {
        let raw = "Sure! Here is the plan:\n```json\n{\"tasks\": [{\"op\": \"translate_zh\"}]}\n```";
        let value = parse_plan_text(raw).unwrap();
        assert_eq!(value["tasks"][0]["op"], json!("translate_zh"));

        assert!(matches!(parse_plan_text("no json here"), Err(SkillError::Parse(_))));
        assert!(matches!(parse_plan_text("{\"steps\": []}"), Err(SkillError::Parse(_))));
    }
}
