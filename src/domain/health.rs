use serde::Serialize;

/// Memory or disk usage above this percentage turns a healthy verdict into a warning.
pub const RESOURCE_WARNING_PERCENT: f64 = 90.0;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
}

impl HealthStatus {
    /// Broker reachability dominates; resource pressure only ever warns.
    #[must_use]
    pub fn derive(broker_reachable: bool, memory_percent: f64, disk_percent: f64) -> Self {
        if !broker_reachable {
            Self::Degraded
        } else if memory_percent > RESOURCE_WARNING_PERCENT
            || disk_percent > RESOURCE_WARNING_PERCENT
        {
            Self::Warning
        } else {
            Self::Healthy
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerLinkStatus {
    Connected,
    Disconnected,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BrokerHealth {
    pub status: BrokerLinkStatus,
    pub host: String,
    pub message: String,
}

impl BrokerHealth {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == BrokerLinkStatus::Connected
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct MemoryUsage {
    pub total_mb: f64,
    pub available_mb: f64,
    pub used_mb: f64,
    pub percent: f64,
}

impl MemoryUsage {
    #[must_use]
    pub fn from_bytes(total: u64, available: u64, used: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            total.saturating_sub(available) as f64 / total as f64 * 100.0
        };
        Self {
            total_mb: round2(total as f64 / MIB),
            available_mb: round2(available as f64 / MIB),
            used_mb: round2(used as f64 / MIB),
            percent: round1(percent),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct DiskUsage {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub percent: f64,
}

impl DiskUsage {
    #[must_use]
    pub fn from_bytes(total: u64, free: u64) -> Self {
        let used = total.saturating_sub(free);
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            total_gb: round2(total as f64 / GIB),
            used_gb: round2(used as f64 / GIB),
            free_gb: round2(free as f64 / GIB),
            percent: round1(percent),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessUsage {
    pub memory_rss_mb: f64,
    pub memory_vms_mb: f64,
    pub cpu_percent: f64,
}

impl ProcessUsage {
    #[must_use]
    pub fn from_bytes(rss: u64, vms: u64, cpu_percent: f32) -> Self {
        Self {
            memory_rss_mb: round2(rss as f64 / MIB),
            memory_vms_mb: round2(vms as f64 / MIB),
            cpu_percent: round1(f64::from(cpu_percent)),
        }
    }
}

/// One reading of the host and the current process.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SystemSample {
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    pub process: ProcessUsage,
}

/// Response body of `GET /health`. Built per request and never cached.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub service: String,
    pub status: HealthStatus,
    pub rabbitmq: BrokerHealth,
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    pub process: ProcessUsage,
}

impl HealthSnapshot {
    #[must_use]
    pub fn assemble(service: &str, broker: BrokerHealth, sample: SystemSample) -> Self {
        let status = HealthStatus::derive(
            broker.is_connected(),
            sample.memory.percent,
            sample.disk.percent,
        );
        Self {
            service: service.to_string(),
            status,
            rabbitmq: broker,
            memory: sample.memory,
            disk: sample.disk,
            process: sample.process,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
