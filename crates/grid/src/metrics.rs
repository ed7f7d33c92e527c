use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{CpuExt, System, SystemExt};
use tracing::debug;

/// Raw OS readings, before health is derived.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub cpu: f64,
    pub battery: Option<f64>,
}

/// Source of CPU and battery readings.
pub trait MetricsSource: Send + Sync {
    fn sample(&self) -> Sample;
}

/// Samples the host through `sysinfo` and the kernel's power-supply class.
pub struct SystemMetrics {
    system: Mutex<System>,
}

impl SystemMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime the counters so the first real sample has a baseline.
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemMetrics {
    fn sample(&self) -> Sample {
        let cpu = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            f64::from(system.global_cpu_info().cpu_usage())
        };
        let battery = read_battery(Path::new("/sys/class/power_supply"));
        debug!("Sampled cpu={:.1} battery={:?}", cpu, battery);
        Sample { cpu, battery }
    }
}

/// First readable `capacity` under a power-supply directory, if any.
fn read_battery(root: &Path) -> Option<f64> {
    let entries = std::fs::read_dir(root).ok()?;
    entries.flatten().find_map(|entry| {
        std::fs::read_to_string(entry.path().join("capacity"))
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
    })
}

/// Count of outstanding work units on this node.
///
/// Cloning shares the counter. Units are held through [`LoadGuard`]s so a
/// panicking or early-returning task still releases its unit.
#[derive(Debug, Clone, Default)]
pub struct LoadGauge {
    current: Arc<AtomicU32>,
}

impl LoadGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn acquire(&self) -> LoadGuard {
        self.current.fetch_add(1, Ordering::Relaxed);
        LoadGuard {
            current: Arc::clone(&self.current),
        }
    }
}

#[must_use = "the load unit is released when the guard is dropped"]
pub struct LoadGuard {
    current: Arc<AtomicU32>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_guard_releases() {
        let gauge = LoadGauge::new();
        let shared = gauge.clone();
        {
            let _a = gauge.acquire();
            let _b = shared.acquire();
            assert_eq!(gauge.current(), 2);
        }
        assert_eq!(gauge.current(), 0);
    }

    #[test]
    fn test_missing_power_supply_is_unknown() {
        assert_eq!(read_battery(Path::new("/nonexistent/power_supply")), None);
    }

    #[test]
    fn test_system_sample_in_range() {
        let sample = SystemMetrics::new().sample();
        assert!(sample.cpu >= 0.0);
    }
}
