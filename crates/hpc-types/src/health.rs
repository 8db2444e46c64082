//! Health snapshot and the status downgrade rule applied over raw utilization.

use serde::{Deserialize, Serialize};

use crate::canonical::{CanonicalValue, Canonicalize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl HealthStatus {
    fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Offline => "offline",
        }
    }
}

/// Utilization thresholds and an explicit unhealthy cutoff, so the
/// downgrade rule in [`HealthSnapshot::downgrade`] is configurable per
/// deployment without recompiling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub degraded_utilization_percent: f64,
    pub unhealthy_error_count_24h: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_utilization_percent: 90.0,
            unhealthy_error_count_24h: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub cpu_utilization_percent: f64,
    pub memory_utilization_percent: f64,
    pub gpu_utilization_percent: f64,
    pub gpu_memory_utilization_percent: f64,
    pub disk_io_utilization_percent: f64,
    pub network_utilization_percent: f64,
    pub cpu_temperature_celsius: Option<f64>,
    pub gpu_temperature_celsius: Option<f64>,
    pub error_count_24h: u32,
    pub warning_count_24h: u32,
    pub last_error: Option<String>,
    pub scheduler_state: String,
}

impl HealthSnapshot {
    /// Any utilization >= threshold downgrades `healthy` to `degraded`;
    /// `error_count_24h` at or above the configured cutoff forces `unhealthy`.
    /// `offline` is never produced here — only the caller observing a
    /// collection failure sets it explicitly.
    pub fn downgrade(mut self, thresholds: &HealthThresholds) -> Self {
        if matches!(self.status, HealthStatus::Offline) {
            return self;
        }

        let max_util = [
            self.cpu_utilization_percent,
            self.memory_utilization_percent,
            self.gpu_utilization_percent,
            self.gpu_memory_utilization_percent,
            self.disk_io_utilization_percent,
            self.network_utilization_percent,
        ]
        .into_iter()
        .fold(0.0_f64, f64::max);

        if matches!(self.status, HealthStatus::Healthy)
            && max_util >= thresholds.degraded_utilization_percent
        {
            self.status = HealthStatus::Degraded;
        }

        if self.error_count_24h >= thresholds.unhealthy_error_count_24h {
            self.status = HealthStatus::Unhealthy;
        }

        self
    }
}

impl Canonicalize for HealthSnapshot {
    fn to_canonical(&self) -> CanonicalValue {
        let mut fields: Vec<(&'static str, CanonicalValue)> = vec![
            ("status", CanonicalValue::Str(self.status.as_str().to_string())),
            ("uptime_seconds", CanonicalValue::UInt(self.uptime_seconds)),
            (
                "cpu_utilization_percent",
                CanonicalValue::Float(self.cpu_utilization_percent),
            ),
            (
                "memory_utilization_percent",
                CanonicalValue::Float(self.memory_utilization_percent),
            ),
            (
                "gpu_utilization_percent",
                CanonicalValue::Float(self.gpu_utilization_percent),
            ),
            (
                "gpu_memory_utilization_percent",
                CanonicalValue::Float(self.gpu_memory_utilization_percent),
            ),
            (
                "disk_io_utilization_percent",
                CanonicalValue::Float(self.disk_io_utilization_percent),
            ),
            (
                "network_utilization_percent",
                CanonicalValue::Float(self.network_utilization_percent),
            ),
        ];
        if let Some(t) = self.cpu_temperature_celsius {
            fields.push(("cpu_temperature_celsius", CanonicalValue::Float(t)));
        }
        if let Some(t) = self.gpu_temperature_celsius {
            fields.push(("gpu_temperature_celsius", CanonicalValue::Float(t)));
        }
        fields.push(("error_count_24h", CanonicalValue::UInt(self.error_count_24h as u64)));
        fields.push(("warning_count_24h", CanonicalValue::UInt(self.warning_count_24h as u64)));
        if let Some(ref e) = self.last_error {
            fields.push(("last_error", CanonicalValue::Str(e.clone())));
        }
        fields.push((
            "scheduler_state",
            CanonicalValue::Str(self.scheduler_state.clone()),
        ));
        CanonicalValue::Object(fields)
    }
}
