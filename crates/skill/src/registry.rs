use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::definition::StepExecutor;

/// Capability name to executor table for skills this node runs itself.
#[derive(Default)]
pub struct LocalSkillRegistry {
    skills: HashMap<String, Arc<dyn StepExecutor>>,
}

impl LocalSkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill, replacing any previous one under the same name
    pub fn register(&mut self, op: &str, skill: Arc<dyn StepExecutor>) {
        info!("Registered local skill: {}", op);
        self.skills.insert(op.to_string(), skill);
    }

    pub fn with(mut self, op: &str, skill: Arc<dyn StepExecutor>) -> Self {
        self.register(op, skill);
        self
    }

    pub fn get(&self, op: &str) -> Option<Arc<dyn StepExecutor>> {
        self.skills.get(op).cloned()
    }

    pub fn has_skill(&self, op: &str) -> bool {
        self.skills.contains_key(op)
    }

    /// Registered names, sorted
    pub fn list_skills(&self) -> Vec<String> {
        let mut names: Vec<_> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }
}
