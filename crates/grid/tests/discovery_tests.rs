use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use echonet_grid::{
    Advertisement, AdvertisementPublisher, CapabilityAdvertiser, InboundAdvertisement, LoadGauge,
    MetricsSource, NodeId, PeerDirectory, Result, Sample, DEFAULT_PEER_TTL,
};

/// Delivers every publication straight into a set of directories, standing
/// in for the multicast segment.
struct LoopbackSegment {
    address: IpAddr,
    port: u16,
    listeners: Vec<Arc<PeerDirectory>>,
}

#[async_trait]
impl AdvertisementPublisher for LoopbackSegment {
    async fn publish(&self, ad: &Advertisement) -> Result<()> {
        let inbound = InboundAdvertisement::from_advertisement(ad, self.address, self.port)?;
        for directory in &self.listeners {
            directory.ingest(&inbound);
        }
        Ok(())
    }

    async fn withdraw(&self, _id: &NodeId) -> Result<()> {
        Ok(())
    }
}

struct Idle;

impl MetricsSource for Idle {
    fn sample(&self) -> Sample {
        Sample {
            cpu: 5.0,
            battery: None,
        }
    }
}

fn segment(listeners: Vec<Arc<PeerDirectory>>) -> Arc<LoopbackSegment> {
    Arc::new(LoopbackSegment {
        address: "192.168.1.20".parse().unwrap(),
        port: 5000,
        listeners,
    })
}

#[tokio::test]
async fn test_node_never_discovers_itself() {
    let dir_x = Arc::new(PeerDirectory::new(NodeId::new("X"), DEFAULT_PEER_TTL));
    let dir_y = Arc::new(PeerDirectory::new(NodeId::new("Y"), DEFAULT_PEER_TTL));

    let advertiser = CapabilityAdvertiser::new(
        NodeId::new("X"),
        vec!["translate_zh".into()],
        5,
        Arc::new(Idle),
        segment(vec![Arc::clone(&dir_x), Arc::clone(&dir_y)]),
        LoadGauge::new(),
    );
    advertiser.advertise_once().await.unwrap();

    assert!(dir_x.list_active().is_empty());
    let seen = dir_y.find_by_skill("translate_zh");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id.as_str(), "X");
    assert_eq!(seen[0].base_url(), "http://192.168.1.20:5000");
    assert_eq!(seen[0].metrics.health, 1.0);
}

#[tokio::test]
async fn test_malformed_advertisement_is_discarded() {
    let dir = PeerDirectory::new(NodeId::new("Y"), DEFAULT_PEER_TTL);
    let mut properties = std::collections::HashMap::new();
    properties.insert("id".to_string(), "X".to_string());
    properties.insert("skills".to_string(), "[broken".to_string());

    let inbound = InboundAdvertisement::new(properties, vec!["10.0.0.1".parse().unwrap()], 5000);
    assert!(dir.ingest(&inbound).is_none());
    assert_eq!(dir.count(), 0);
}

#[tokio::test]
async fn test_periodic_advertising_keeps_peer_fresh() {
    let dir_y = Arc::new(PeerDirectory::new(NodeId::new("Y"), Duration::from_millis(80)));
    let mut advertiser = CapabilityAdvertiser::new(
        NodeId::new("X"),
        vec!["echo".into()],
        5,
        Arc::new(Idle),
        segment(vec![Arc::clone(&dir_y)]),
        LoadGauge::new(),
    )
    .with_interval(Duration::from_millis(20));

    advertiser.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(dir_y.count(), 1);

    advertiser.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(dir_y.count(), 0);
}
