use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use echonet_grid::{MetricsHandle, NodeId, NodeRecord, PeerDirectory};

use crate::error::{Result, SkillError};

/// How to choose among several nodes that all declare an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Local node if it declares the op, then peers in discovery order.
    #[default]
    FirstMatch,
    /// Highest advertised health; ties keep first-match order.
    HealthAware,
}

/// Where a step will run.
#[derive(Debug, Clone)]
pub enum Target {
    Local,
    Remote(NodeRecord),
}

/// Decision on where to route a step
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub node: NodeId,
    pub target: Target,
}

impl RouteDecision {
    pub fn is_local(&self) -> bool {
        matches!(self.target, Target::Local)
    }
}

/// Resolves capability names to the node that should run them.
pub struct SkillRouter {
    local_id: NodeId,
    local_skills: BTreeSet<String>,
    local_metrics: Option<MetricsHandle>,
    directory: Arc<PeerDirectory>,
    policy: SelectionPolicy,
}

impl SkillRouter {
    pub fn new<I, S>(local_skills: I, directory: Arc<PeerDirectory>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local_id: directory.local_id().clone(),
            local_skills: local_skills.into_iter().map(Into::into).collect(),
            local_metrics: None,
            directory,
            policy: SelectionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Metrics of the local node, used by [`SelectionPolicy::HealthAware`].
    pub fn with_local_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.local_metrics = Some(metrics);
        self
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn local_skills(&self) -> &BTreeSet<String> {
        &self.local_skills
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn local_declares(&self, op: &str) -> bool {
        self.local_skills.contains(op)
    }

    /// Whether `id` is this node or a fresh peer.
    pub fn knows_node(&self, id: &str) -> bool {
        self.local_id == *id || self.directory.get(id).is_some()
    }

    /// Whether `id` is this node or a fresh peer, and declares `op`.
    pub fn node_declares(&self, id: &str, op: &str) -> bool {
        if self.local_id == *id {
            return self.local_declares(op);
        }
        self.directory.get(id).is_some_and(|p| p.has_skill(op))
    }

    /// Every op some known node declares, ours included.
    pub fn skill_catalogue(&self) -> BTreeSet<String> {
        let mut catalogue = self.directory.skill_catalogue();
        catalogue.extend(self.local_skills.iter().cloned());
        catalogue
    }

    /// Pick the node for `op`, honoring `target_node` only when that node is
    /// known and declares the op.
    pub fn resolve(&self, op: &str, target_node: Option<&NodeId>) -> Result<RouteDecision> {
        if let Some(target) = target_node {
            if let Some(decision) = self.resolve_explicit(op, target) {
                return Ok(decision);
            }
            debug!(
                "Ignoring target_node {} for op {}: unknown or does not declare it",
                target, op
            );
        }

        let decision = match self.policy {
            SelectionPolicy::FirstMatch => self.first_match(op),
            SelectionPolicy::HealthAware => self.healthiest(op),
        }
        .ok_or_else(|| SkillError::capability(op))?;

        info!("Routed op {} to node {}", op, decision.node);
        Ok(decision)
    }

    fn resolve_explicit(&self, op: &str, target: &NodeId) -> Option<RouteDecision> {
        if *target == self.local_id {
            return self.local_declares(op).then(|| self.local_decision());
        }
        self.directory
            .get(target.as_str())
            .filter(|p| p.has_skill(op))
            .map(remote_decision)
    }

    fn first_match(&self, op: &str) -> Option<RouteDecision> {
        if self.local_declares(op) {
            return Some(self.local_decision());
        }
        self.directory
            .find_by_skill(op)
            .into_iter()
            .next()
            .map(remote_decision)
    }

    fn healthiest(&self, op: &str) -> Option<RouteDecision> {
        let mut best: Option<(f64, RouteDecision)> = None;

        if self.local_declares(op) {
            let health = self
                .local_metrics
                .as_ref()
                .map(|m| m.current().health)
                .unwrap_or(1.0);
            best = Some((health, self.local_decision()));
        }

        for peer in self.directory.find_by_skill(op) {
            let health = peer.metrics.health;
            if best.as_ref().map_or(true, |(h, _)| health > *h) {
                best = Some((health, remote_decision(peer)));
            }
        }

        best.map(|(_, decision)| decision)
    }

    fn local_decision(&self) -> RouteDecision {
        RouteDecision {
            node: self.local_id.clone(),
            target: Target::Local,
        }
    }
}

fn remote_decision(peer: NodeRecord) -> RouteDecision {
    RouteDecision {
        node: peer.id.clone(),
        target: Target::Remote(peer),
    }
}
