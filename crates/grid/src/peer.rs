use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::health::Metrics;
use crate::wire::InboundAdvertisement;

/// Freshness window after which a silent peer is forgotten.
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(10);

/// Stable, human-chosen node identifier (e.g. `nodeA`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// What we know about a peer from its latest advertisement.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: NodeId,
    pub address: IpAddr,
    pub port: u16,
    pub skills: BTreeSet<String>,
    pub metrics: Metrics,
    pub last_seen: Instant,
}

impl NodeRecord {
    pub fn new(id: NodeId, address: IpAddr, port: u16) -> Self {
        Self {
            id,
            address,
            port,
            skills: BTreeSet::new(),
            metrics: Metrics::default(),
            last_seen: Instant::now(),
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn has_skill(&self, op: &str) -> bool {
        self.skills.contains(op)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Base URL of the node's HTTP surface.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.socket_addr())
    }

    pub fn is_stale_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > ttl
    }
}

/// TTL-expiring table of every other node we have heard from.
///
/// Records keep first-discovered order; a refresh updates a record in place
/// without moving it. Stale records are purged lazily by the read
/// operations rather than by a background sweep.
pub struct PeerDirectory {
    local_id: NodeId,
    ttl: Duration,
    peers: RwLock<Vec<NodeRecord>>,
}

impl PeerDirectory {
    pub fn new(local_id: NodeId, ttl: Duration) -> Self {
        Self {
            local_id,
            ttl,
            peers: RwLock::new(Vec::new()),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Decode and upsert an inbound advertisement.
    ///
    /// Returns the peer id when the advertisement was accepted. Our own
    /// advertisements and undecodable ones are dropped.
    pub fn ingest(&self, inbound: &InboundAdvertisement) -> Option<NodeId> {
        let record = match inbound.decode() {
            Ok(record) => record,
            Err(e) => {
                debug!("Discarding malformed advertisement: {}", e);
                return None;
            }
        };
        let id = record.id.clone();
        self.upsert(record).then_some(id)
    }

    /// Insert or refresh a record, stamping `last_seen` with the current time.
    pub fn upsert(&self, record: NodeRecord) -> bool {
        self.upsert_seen_at(record, Instant::now())
    }

    /// Insert or refresh a record with an explicit `last_seen`.
    pub fn upsert_seen_at(&self, mut record: NodeRecord, seen_at: Instant) -> bool {
        if record.id == self.local_id {
            return false;
        }
        record.last_seen = seen_at;

        let mut peers = self.peers.write();
        match peers.iter_mut().find(|p| p.id == record.id) {
            Some(existing) => {
                debug!("Refreshed peer {} (health {:.2})", record.id, record.metrics.health);
                *existing = record;
            }
            None => {
                info!(
                    "Discovered peer {} at {} with skills {:?}",
                    record.id,
                    record.socket_addr(),
                    record.skills
                );
                peers.push(record);
            }
        }
        true
    }

    /// Every fresh record, purging stale ones.
    pub fn list_active(&self) -> Vec<NodeRecord> {
        self.list_active_at(Instant::now())
    }

    pub fn list_active_at(&self, now: Instant) -> Vec<NodeRecord> {
        let mut peers = self.peers.write();
        let ttl = self.ttl;
        peers.retain(|p| {
            let stale = p.is_stale_at(now, ttl);
            if stale {
                info!("Peer {} expired", p.id);
            }
            !stale
        });
        peers.clone()
    }

    /// Fresh records declaring `op`, in first-discovered order.
    pub fn find_by_skill(&self, op: &str) -> Vec<NodeRecord> {
        self.list_active()
            .into_iter()
            .filter(|p| p.has_skill(op))
            .collect()
    }

    /// A fresh record by id.
    pub fn get(&self, id: &str) -> Option<NodeRecord> {
        self.list_active().into_iter().find(|p| p.id == *id)
    }

    /// Union of skills declared by fresh records.
    pub fn skill_catalogue(&self) -> BTreeSet<String> {
        self.list_active()
            .into_iter()
            .flat_map(|p| p.skills.into_iter())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.list_active().len()
    }

    /// Forget every peer.
    pub fn clear(&self) {
        self.peers.write().clear();
    }
}
