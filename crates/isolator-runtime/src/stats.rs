use crate::client::RawStats;
use serde::{Deserialize, Serialize};

const PRIMARY_INTERFACE: &str = "eth0";

/// Point-in-time resource usage of one application container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub status: String,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_percent: f64,
    pub network_rx: u64,
    pub network_tx: u64,
}

impl ContainerStats {
    /// Zeroed snapshot reported when the engine cannot be read.
    pub fn unavailable() -> Self {
        Self {
            status: "error".to_string(),
            cpu_percent: 0.0,
            memory_usage: 0,
            memory_percent: 0.0,
            network_rx: 0,
            network_tx: 0,
        }
    }

    pub fn from_raw(status: impl Into<String>, raw: &RawStats) -> Self {
        let cpu_delta = raw.cpu_total_usage as f64 - raw.precpu_total_usage as f64;
        let system_delta = raw.system_cpu_usage as f64 - raw.presystem_cpu_usage as f64;
        let network = raw
            .networks
            .get(PRIMARY_INTERFACE)
            .copied()
            .unwrap_or_default();

        Self {
            status: status.into(),
            cpu_percent: round2(cpu_percent(cpu_delta, system_delta, raw.online_cpus)),
            memory_usage: raw.memory_usage,
            memory_percent: round2(memory_percent(raw.memory_usage, raw.memory_limit)),
            network_rx: network.rx_bytes,
            network_tx: network.tx_bytes,
        }
    }
}

/// CPU utilization across `online_cpus` logical CPUs. Zero unless both
/// deltas are positive.
pub fn cpu_percent(cpu_delta: f64, system_delta: f64, online_cpus: u64) -> f64 {
    if cpu_delta <= 0.0 || system_delta <= 0.0 {
        return 0.0;
    }
    (cpu_delta / system_delta) * online_cpus as f64 * 100.0
}

pub fn memory_percent(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    usage as f64 / limit as f64 * 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
