use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::error::{GridError, Result};
use crate::health::Metrics;
use crate::peer::{NodeId, NodeRecord};

/// DNS-SD service type every Echonet node registers under.
pub const SERVICE_TYPE: &str = "_echotest._tcp.local.";

pub const PROP_ID: &str = "id";
pub const PROP_SKILLS: &str = "skills";
pub const PROP_METRICS: &str = "metrics";

/// Full DNS-SD instance name for a node id.
pub fn instance_name(id: &NodeId) -> String {
    format!("{}.{}", id, SERVICE_TYPE)
}

/// What a node publishes about itself on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    pub id: NodeId,
    pub skills: Vec<String>,
    pub metrics: Metrics,
}

impl Advertisement {
    /// Encode as TXT-record properties: `skills` and `metrics` are JSON strings.
    pub fn to_properties(&self) -> Result<HashMap<String, String>> {
        let mut props = HashMap::with_capacity(3);
        props.insert(PROP_ID.to_string(), self.id.to_string());
        props.insert(PROP_SKILLS.to_string(), serde_json::to_string(&self.skills)?);
        props.insert(PROP_METRICS.to_string(), serde_json::to_string(&self.metrics)?);
        Ok(props)
    }

    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let id = props
            .get(PROP_ID)
            .filter(|id| !id.is_empty())
            .ok_or(GridError::MissingProperty(PROP_ID))?;

        let skills = props
            .get(PROP_SKILLS)
            .ok_or(GridError::MissingProperty(PROP_SKILLS))?;
        let skills: Vec<String> =
            serde_json::from_str(skills).map_err(|e| GridError::MalformedProperty {
                property: PROP_SKILLS,
                reason: e.to_string(),
            })?;

        let metrics = props
            .get(PROP_METRICS)
            .ok_or(GridError::MissingProperty(PROP_METRICS))?;
        let metrics: Metrics =
            serde_json::from_str(metrics).map_err(|e| GridError::MalformedProperty {
                property: PROP_METRICS,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id: NodeId::new(id.as_str()),
            skills,
            metrics,
        })
    }
}

/// A service record as delivered by the discovery transport.
#[derive(Debug, Clone)]
pub struct InboundAdvertisement {
    pub properties: HashMap<String, String>,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

impl InboundAdvertisement {
    pub fn new(properties: HashMap<String, String>, addresses: Vec<IpAddr>, port: u16) -> Self {
        Self {
            properties,
            addresses,
            port,
        }
    }

    /// Build the record another node would see for `ad` published at `address:port`.
    pub fn from_advertisement(ad: &Advertisement, address: IpAddr, port: u16) -> Result<Self> {
        Ok(Self::new(ad.to_properties()?, vec![address], port))
    }

    /// Decode into a directory record. IPv4 addresses are preferred.
    pub fn decode(&self) -> Result<NodeRecord> {
        let ad = Advertisement::from_properties(&self.properties)?;
        let address = self
            .addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| self.addresses.first())
            .copied()
            .ok_or(GridError::NoAddress)?;

        Ok(NodeRecord::new(ad.id, address, self.port)
            .with_skills(ad.skills)
            .with_metrics(ad.metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Advertisement {
        Advertisement {
            id: NodeId::new("nodeA"),
            skills: vec!["generate_poem_en".into(), "translate_zh".into()],
            metrics: Metrics::new(12.5, None, 1, 5),
        }
    }

    #[test]
    fn test_properties_shape() {
        let props = sample().to_properties().unwrap();
        assert_eq!(props["id"], "nodeA");
        assert_eq!(props["skills"], r#"["generate_poem_en","translate_zh"]"#);

        let metrics: serde_json::Value = serde_json::from_str(&props["metrics"]).unwrap();
        for field in ["cpu", "battery", "load", "max_load", "health"] {
            assert!(metrics.get(field).is_some(), "missing {field}");
        }
        assert!(metrics["battery"].is_null());
    }

    #[test]
    fn test_instance_name() {
        assert_eq!(
            instance_name(&NodeId::new("nodeA")),
            "nodeA._echotest._tcp.local."
        );
    }

    #[test]
    fn test_decode_record() {
        let inbound =
            InboundAdvertisement::from_advertisement(&sample(), "10.0.0.7".parse().unwrap(), 5000)
                .unwrap();
        let record = inbound.decode().unwrap();
        assert_eq!(record.id.as_str(), "nodeA");
        assert_eq!(record.base_url(), "http://10.0.0.7:5000");
        assert!(record.has_skill("translate_zh"));
    }

    #[test]
    fn test_missing_and_malformed_properties() {
        let mut props = sample().to_properties().unwrap();
        props.remove("metrics");
        assert!(matches!(
            Advertisement::from_properties(&props),
            Err(GridError::MissingProperty("metrics"))
        ));

        let mut props = sample().to_properties().unwrap();
        props.insert("skills".into(), "not json".into());
        assert!(matches!(
            Advertisement::from_properties(&props),
            Err(GridError::MalformedProperty { property: "skills", .. })
        ));
    }

    #[test]
    fn test_no_address() {
        let inbound = InboundAdvertisement::new(sample().to_properties().unwrap(), vec![], 5000);
        assert!(matches!(inbound.decode(), Err(GridError::NoAddress)));
    }
}
