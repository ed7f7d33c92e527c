use serde::{Deserialize, Serialize};

/// Live node metrics as carried in advertisements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// CPU usage, 0-100
    pub cpu: f64,
    /// Battery charge, 0-100, `None` when the device has no readable battery
    pub battery: Option<f64>,
    /// Outstanding work units
    pub load: u32,
    /// Capacity in work units
    pub max_load: u32,
    /// Derived fitness score, 0.0-1.0
    pub health: f64,
}

impl Metrics {
    /// Build metrics from raw readings, deriving `health`.
    pub fn new(cpu: f64, battery: Option<f64>, load: u32, max_load: u32) -> Self {
        Self {
            cpu,
            battery,
            load,
            max_load,
            health: score(cpu, battery, load, max_load),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(0.0, None, 0, 1)
    }
}

/// Health score in `[0, 1]` from CPU, battery and load readings.
///
/// Every adjustment is a subtraction from 1.0, so only the lower bound
/// needs clamping. The two CPU penalties stack: a node above 80% pays both.
pub fn score(cpu: f64, battery: Option<f64>, load: u32, max_load: u32) -> f64 {
    let mut score = 1.0;

    if cpu > 80.0 {
        score -= 0.30;
    }
    if cpu > 50.0 {
        score -= 0.15;
    }

    match battery {
        Some(b) if b < 20.0 => score -= 0.40,
        Some(b) if b < 50.0 => score -= 0.20,
        _ => {}
    }

    let load = f64::from(load);
    let max_load = f64::from(max_load);
    if load > 0.7 * max_load {
        score -= 0.20;
    } else if load > 0.5 * max_load {
        score -= 0.10;
    }

    f64::max(score, 0.0)
}
