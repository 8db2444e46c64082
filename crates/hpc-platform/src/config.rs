//! Layered TOML-file + environment-variable configuration, mirroring the
//! teacher's `PlatformConfig` loading shape exactly.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "configs/agent.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub identity: IdentitySettings,
    pub daemon: DaemonSettings,
    pub observability: ObservabilitySettings,
    pub heartbeat: HeartbeatSettings,
    pub metering: MeteringSettings,
    pub keys: KeySettings,
    pub capacity: CapacitySettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            identity: IdentitySettings::default(),
            daemon: DaemonSettings::default(),
            observability: ObservabilitySettings::default(),
            heartbeat: HeartbeatSettings::default(),
            metering: MeteringSettings::default(),
            keys: KeySettings::default(),
            capacity: CapacitySettings::default(),
        }
    }
}

impl AgentSettings {
    pub fn load() -> Result<Self> {
        Self::load_from_path(None::<PathBuf>)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            File::from(PathBuf::from(DEFAULT_CONFIG_PATH))
                .format(FileFormat::Toml)
                .required(false),
        );

        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_ref()).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("HPCAGENT").separator("__"));

        let config = builder.build()?;
        config.try_deserialize().context("invalid agent configuration")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    pub node_id: String,
    pub cluster_id: String,
    pub provider_address: String,
    pub hostname: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            cluster_id: "default".to_string(),
            provider_address: String::new(),
            hostname: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub base_url: String,
    pub request_timeout_seconds: u64,
    /// Port this agent listens on for inbound peer/daemon messages.
    pub inbound_port: u16,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_seconds: 30,
            inbound_port: 9091,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub log_level: String,
    pub metrics_port: u16,
    pub enable_metrics: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: 9090,
            enable_metrics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_seconds: u64,
    pub latency_probe_targets: Vec<String>,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            latency_probe_targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringSettings {
    pub sampling_interval_seconds: u64,
}

impl Default for MeteringSettings {
    fn default() -> Self {
        Self {
            sampling_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    pub seed_path: String,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            seed_path: "keys/agent.seed".to_string(),
        }
    }
}

/// Static capacity totals the metrics collector can't derive from `/proc`
/// alone (GPU presence, declared storage). Cores fall back to the
/// runtime-detected parallelism when left at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacitySettings {
    pub cpu_cores_total: i64,
    pub storage_gb_total: i64,
    pub gpu_type: String,
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            cpu_cores_total: 0,
            storage_gb_total: 0,
            gpu_type: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let settings = AgentSettings::default();
        assert_eq!(settings.heartbeat.interval_seconds, 30);
        assert_eq!(settings.metering.sampling_interval_seconds, 60);
        assert_eq!(settings.daemon.request_timeout_seconds, 30);
    }
}
