use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GridError, Result};
use crate::health::Metrics;
use crate::metrics::{LoadGauge, MetricsSource};
use crate::peer::NodeId;
use crate::wire::Advertisement;

pub const DEFAULT_ADVERTISE_INTERVAL: Duration = Duration::from_secs(3);

/// Transport that makes an advertisement visible to peers.
///
/// `publish` must update an existing registration in place so peers never
/// observe a gap between two ticks.
#[async_trait]
pub trait AdvertisementPublisher: Send + Sync {
    async fn publish(&self, ad: &Advertisement) -> Result<()>;
    async fn withdraw(&self, id: &NodeId) -> Result<()>;
}

/// Read handle on the metrics of the most recent tick.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle(Arc<RwLock<Metrics>>);

impl MetricsHandle {
    pub fn current(&self) -> Metrics {
        *self.0.read()
    }

    fn set(&self, metrics: Metrics) {
        *self.0.write() = metrics;
    }
}

struct AdvertiserInner {
    id: NodeId,
    skills: Vec<String>,
    max_load: u32,
    source: Arc<dyn MetricsSource>,
    publisher: Arc<dyn AdvertisementPublisher>,
    load: LoadGauge,
    latest: MetricsHandle,
}

impl AdvertiserInner {
    fn snapshot(&self) -> Advertisement {
        let sample = self.source.sample();
        let metrics = Metrics::new(sample.cpu, sample.battery, self.load.current(), self.max_load);
        self.latest.set(metrics);
        Advertisement {
            id: self.id.clone(),
            skills: self.skills.clone(),
            metrics,
        }
    }

    async fn tick(&self) -> Result<Advertisement> {
        let ad = self.snapshot();
        self.publisher.publish(&ad).await?;
        debug!(
            "Advertised {} (health {:.2}, load {}/{})",
            ad.id, ad.metrics.health, ad.metrics.load, ad.metrics.max_load
        );
        Ok(ad)
    }
}

/// Keeps this node visible to peers by re-publishing its advertisement on a
/// fixed period.
pub struct CapabilityAdvertiser {
    inner: Arc<AdvertiserInner>,
    interval: Duration,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl CapabilityAdvertiser {
    pub fn new(
        id: NodeId,
        skills: Vec<String>,
        max_load: u32,
        source: Arc<dyn MetricsSource>,
        publisher: Arc<dyn AdvertisementPublisher>,
        load: LoadGauge,
    ) -> Self {
        Self {
            inner: Arc::new(AdvertiserInner {
                id,
                skills,
                max_load: max_load.max(1),
                source,
                publisher,
                load,
                latest: MetricsHandle::default(),
            }),
            interval: DEFAULT_ADVERTISE_INTERVAL,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn metrics(&self) -> MetricsHandle {
        self.inner.latest.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Sample, score and publish once.
    pub async fn advertise_once(&self) -> Result<Advertisement> {
        self.inner.tick().await
    }

    /// Spawn the periodic publish loop.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(GridError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;
        self.handle = Some(tokio::spawn(Self::run(inner, interval, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);

        info!(
            "Advertising {} every {:?} with skills {:?}",
            self.inner.id, self.interval, self.inner.skills
        );
        Ok(())
    }

    /// Stop the loop and withdraw our record (best effort).
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        if let Err(e) = self.inner.publisher.withdraw(&self.inner.id).await {
            warn!("Failed to withdraw advertisement: {}", e);
        }
        info!("Advertiser stopped");
    }

    async fn run(inner: Arc<AdvertiserInner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = inner.tick().await {
                        warn!("Failed to publish advertisement, retrying next tick: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
