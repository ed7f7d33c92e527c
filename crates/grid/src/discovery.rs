use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::advertiser::AdvertisementPublisher;
use crate::error::Result;
use crate::peer::{NodeId, PeerDirectory};
use crate::wire::{instance_name, Advertisement, InboundAdvertisement, SERVICE_TYPE};

/// Multicast DNS service discovery under [`SERVICE_TYPE`].
///
/// One daemon both publishes our record and browses for everyone else's.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    address: IpAddr,
    port: u16,
}

impl MdnsDiscovery {
    pub fn new(address: IpAddr, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new()?;
        info!("mDNS discovery ready on {}:{}", address, port);
        Ok(Self {
            daemon,
            address,
            port,
        })
    }

    /// Feed every resolved peer record into `directory` until `shutdown` fires.
    pub fn spawn_listener(
        &self,
        directory: Arc<PeerDirectory>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let events = self.daemon.browse(SERVICE_TYPE)?;
        info!("Browsing for peers on {}", SERVICE_TYPE);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv_async() => match event {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            let inbound = to_inbound(&info);
                            if directory.ingest(&inbound).is_none() {
                                debug!("Ignored record {}", info.get_fullname());
                            }
                        }
                        Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                            // Expiry is left to the directory's TTL.
                            debug!("Peer record removed: {}", fullname);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("mDNS browse channel closed: {}", e);
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Peer listener stopped");
        }))
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!("mDNS daemon shutdown failed: {}", e);
        }
    }
}

#[async_trait]
impl AdvertisementPublisher for MdnsDiscovery {
    async fn publish(&self, ad: &Advertisement) -> Result<()> {
        let host_name = format!("{}.local.", ad.id);
        let address = self.address.to_string();
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            ad.id.as_str(),
            &host_name,
            address.as_str(),
            self.port,
            ad.to_properties()?,
        )?;
        // Registering an existing instance name re-announces it with the
        // new TXT record; there is no unregister in between.
        self.daemon.register(info)?;
        Ok(())
    }

    async fn withdraw(&self, id: &NodeId) -> Result<()> {
        self.daemon.unregister(&instance_name(id))?;
        Ok(())
    }
}

fn to_inbound(info: &ServiceInfo) -> InboundAdvertisement {
    let properties = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();
    let addresses = info.get_addresses().iter().copied().collect();
    InboundAdvertisement::new(properties, addresses, info.get_port())
}

/// LAN address other nodes can reach us on; loopback when offline.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        // No packet is sent; connecting only selects the outbound interface.
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Metrics;

    #[test]
    fn test_resolved_record_decodes() {
        let ad = Advertisement {
            id: NodeId::new("nodeB"),
            skills: vec!["translate_zh".into(), "summarize".into()],
            metrics: Metrics::new(62.0, Some(40.0), 1, 5),
        };
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            "nodeB",
            "nodeB.local.",
            "192.168.1.7",
            5001,
            ad.to_properties().unwrap(),
        )
        .unwrap();

        let record = to_inbound(&info).decode().unwrap();
        assert_eq!(record.id, ad.id);
        assert!(record.has_skill("translate_zh"));
        assert!(record.has_skill("summarize"));
        assert_eq!(record.skills.len(), 2);
        assert_eq!(record.metrics, ad.metrics);
        assert_eq!(record.address, "192.168.1.7".parse::<IpAddr>().unwrap());
        assert_eq!(record.port, 5001);
    }
}
