pub mod advertiser;
pub mod discovery;
pub mod error;
pub mod health;
pub mod metrics;
pub mod peer;
pub mod wire;

pub use advertiser::{
    AdvertisementPublisher, CapabilityAdvertiser, MetricsHandle, DEFAULT_ADVERTISE_INTERVAL,
};
pub use discovery::{local_ip, MdnsDiscovery};
pub use error::{GridError, Result};
pub use health::{score, Metrics};
pub use metrics::{LoadGauge, LoadGuard, MetricsSource, Sample, SystemMetrics};
pub use peer::{NodeId, NodeRecord, PeerDirectory, DEFAULT_PEER_TTL};
pub use wire::{instance_name, Advertisement, InboundAdvertisement, SERVICE_TYPE};
