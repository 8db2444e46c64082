//! Local node sampling: capacity, health, hardware facts, and peer latency.
//!
//! Never fails a whole snapshot over one missing source — `/proc` reads
//! that fail zero-fill the affected fields instead of propagating an error.

use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, warn};

use hpc_types::{
    CapacitySnapshot, HardwareFacts, HealthSnapshot, HealthStatus, HealthThresholds, JobSummary,
    LatencyProbe, ResourceTriple, ServiceSummary,
};

use crate::gpu::GpuProbe;

const LATENCY_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const ERROR_WINDOW: chrono::Duration = chrono::Duration::hours(24);

/// Declared static capacity totals the collector can't read from `/proc`
/// (GPU count/type, storage totals) — supplied at agent startup from
/// config or hardware discovery.
#[derive(Debug, Clone)]
pub struct StaticCapacity {
    pub cpu_cores_total: i64,
    pub storage_gb_total: i64,
    pub gpu_type: String,
}

/// Samples local capacity, health, hardware, and peer latency. Owns a
/// rolling 24h error/warning window and a pluggable GPU probe backend.
pub struct MetricsCollector {
    static_capacity: StaticCapacity,
    gpu_probe: Arc<dyn GpuProbe>,
    thresholds: HealthThresholds,
    started_at: Instant,
    errors: parking_lot::Mutex<VecDeque<DateTime<Utc>>>,
    warnings: parking_lot::Mutex<VecDeque<DateTime<Utc>>>,
    last_error: parking_lot::Mutex<Option<String>>,
    scheduler_state: parking_lot::Mutex<String>,
}

impl MetricsCollector {
    pub fn new(static_capacity: StaticCapacity, gpu_probe: Arc<dyn GpuProbe>) -> Self {
        Self {
            static_capacity,
            gpu_probe,
            thresholds: HealthThresholds::default(),
            started_at: Instant::now(),
            errors: parking_lot::Mutex::new(VecDeque::new()),
            warnings: parking_lot::Mutex::new(VecDeque::new()),
            last_error: parking_lot::Mutex::new(None),
            scheduler_state: parking_lot::Mutex::new("idle".to_string()),
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let now = Utc::now();
        self.errors.lock().push_back(now);
        *self.last_error.lock() = Some(message.into());
        prune_older_than(&mut self.errors.lock(), now);
    }

    pub fn record_warning(&self) {
        let now = Utc::now();
        self.warnings.lock().push_back(now);
        prune_older_than(&mut self.warnings.lock(), now);
    }

    pub fn set_scheduler_state(&self, state: impl Into<String>) {
        *self.scheduler_state.lock() = state.into();
    }

    /// `/proc/stat` + `/proc/loadavg`-backed CPU utilization, `/proc/meminfo`
    /// for memory. Missing sources zero-fill rather than erroring.
    pub fn collect_capacity(&self) -> CapacitySnapshot {
        let (mem_total_gb, mem_available_gb) = read_meminfo_gb().unwrap_or((0, 0));
        let cpu_cores_total = self.static_capacity.cpu_cores_total;
        let cpu_busy = read_loadavg_busy_cores(cpu_cores_total).unwrap_or(0);
        let cpu_available = (cpu_cores_total - cpu_busy).max(0);

        CapacitySnapshot {
            cpu_cores: ResourceTriple::new(cpu_cores_total, cpu_available, cpu_cores_total - cpu_available),
            memory_gb: ResourceTriple::new(mem_total_gb, mem_available_gb, mem_total_gb - mem_available_gb),
            gpu_count: ResourceTriple::new(0, 0, 0),
            gpu_type: self.static_capacity.gpu_type.clone(),
            storage_gb: ResourceTriple::new(self.static_capacity.storage_gb_total, 0, 0),
        }
    }

    pub async fn collect_health(&self) -> HealthSnapshot {
        let cpu_utilization_percent = read_loadavg_percent(self.static_capacity.cpu_cores_total).unwrap_or(0.0);
        let (mem_total_gb, mem_available_gb) = read_meminfo_gb().unwrap_or((0, 0));
        let memory_utilization_percent = if mem_total_gb > 0 {
            100.0 * (1.0 - mem_available_gb as f64 / mem_total_gb as f64)
        } else {
            0.0
        };

        let gpu_readings = self.gpu_probe.probe().await;
        let (gpu_utilization_percent, gpu_memory_utilization_percent, gpu_temperature_celsius) =
            if gpu_readings.is_empty() {
                (0.0, 0.0, None)
            } else {
                let n = gpu_readings.len() as f64;
                let util = gpu_readings.iter().map(|g| g.utilization_percent).sum::<f64>() / n;
                let mem_util = gpu_readings.iter().map(|g| g.memory_utilization_percent).sum::<f64>() / n;
                let temp = gpu_readings.iter().filter_map(|g| g.temperature_celsius).fold(None, |acc, t| {
                    Some(acc.map_or(t, |a: f64| a.max(t)))
                });
                (util, mem_util, temp)
            };

        let now = Utc::now();
        let error_count_24h = {
            let mut errors = self.errors.lock();
            prune_older_than(&mut errors, now);
            errors.len() as u32
        };
        let warning_count_24h = {
            let mut warnings = self.warnings.lock();
            prune_older_than(&mut warnings, now);
            warnings.len() as u32
        };

        let snapshot = HealthSnapshot {
            status: HealthStatus::Healthy,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            cpu_utilization_percent,
            memory_utilization_percent,
            gpu_utilization_percent,
            gpu_memory_utilization_percent,
            disk_io_utilization_percent: 0.0,
            network_utilization_percent: 0.0,
            cpu_temperature_celsius: None,
            gpu_temperature_celsius,
            error_count_24h,
            warning_count_24h,
            last_error: self.last_error.lock().clone(),
            scheduler_state: self.scheduler_state.lock().clone(),
        };
        snapshot.downgrade(&self.thresholds)
    }

    /// Hardware facts for the fingerprint formula; falls back to empty
    /// strings/zero totals when `/proc/cpuinfo` can't be read.
    pub fn collect_hardware(&self) -> HardwareFacts {
        let (cpu_model, cpu_vendor) = read_cpuinfo().unwrap_or_default();
        let (mem_total_gb, _) = read_meminfo_gb().unwrap_or((0, 0));

        HardwareFacts {
            cpu_model,
            cpu_vendor,
            cpu_arch: std::env::consts::ARCH.to_string(),
            gpu_model: self.static_capacity.gpu_type.clone(),
            storage_type: "unknown".to_string(),
            cpu_cores_total: self.static_capacity.cpu_cores_total.max(0) as u32,
            memory_gb_total: mem_total_gb.max(0) as u64,
            gpu_count_total: 0,
            storage_gb_total: self.static_capacity.storage_gb_total.max(0) as u64,
        }
    }

    /// Probes each target with a 500ms timeout; a failed or timed-out
    /// probe records 100% packet loss rather than being omitted.
    pub async fn collect_latency(&self, targets: &[(String, std::net::IpAddr)]) -> Vec<LatencyProbe> {
        let mut probes = Vec::with_capacity(targets.len());
        for (node_id, addr) in targets {
            let measured_at = Utc::now();
            let started = Instant::now();
            let result = timeout(LATENCY_PROBE_TIMEOUT, tcp_ping(*addr)).await;
            match result {
                Ok(Ok(())) => probes.push(LatencyProbe {
                    target_node_id: node_id.clone(),
                    latency_us: started.elapsed().as_micros() as u64,
                    packet_loss_percent: 0.0,
                    measured_at,
                }),
                _ => {
                    debug!(target = %node_id, "latency probe failed or timed out");
                    probes.push(LatencyProbe::failed(node_id.clone(), measured_at));
                }
            }
        }
        probes
    }

    /// Fast-path passthrough: job/service state lives in the node agent,
    /// the collector just shapes it into the heartbeat's summary form.
    pub fn collect_jobs(&self, jobs: &[JobSummary]) -> Vec<JobSummary> {
        jobs.to_vec()
    }

    pub fn collect_services(&self, services: &[ServiceSummary]) -> Vec<ServiceSummary> {
        services.to_vec()
    }
}

fn prune_older_than(queue: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    while let Some(front) = queue.front() {
        if now.signed_duration_since(*front) > ERROR_WINDOW {
            queue.pop_front();
        } else {
            break;
        }
    }
}

async fn tcp_ping(addr: std::net::IpAddr) -> std::io::Result<()> {
    tokio::net::TcpStream::connect((addr, 0)).await.map(|_| ())
}

fn read_meminfo_gb() -> Option<(i64, i64)> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    let mut total_kb = None;
    let mut available_kb = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb_field(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = parse_kb_field(rest);
        }
    }
    Some((
        total_kb.unwrap_or(0) / 1024 / 1024,
        available_kb.unwrap_or(0) / 1024 / 1024,
    ))
}

fn parse_kb_field(rest: &str) -> Option<i64> {
    rest.trim().split_whitespace().next()?.parse().ok()
}

fn read_loadavg_busy_cores(total_cores: i64) -> Option<i64> {
    let percent = read_loadavg_percent(total_cores)?;
    Some(((percent / 100.0) * total_cores as f64).round() as i64)
}

fn read_loadavg_percent(total_cores: i64) -> Option<f64> {
    if total_cores <= 0 {
        return None;
    }
    let contents = fs::read_to_string("/proc/loadavg").ok()?;
    let load1: f64 = contents.split_whitespace().next()?.parse().ok()?;
    Some((load1 / total_cores as f64 * 100.0).min(100.0).max(0.0))
}

fn read_cpuinfo() -> Option<(String, String)> {
    let contents = fs::read_to_string("/proc/cpuinfo").ok()?;
    let mut model = None;
    let mut vendor = None;
    for line in contents.lines() {
        if let Some((key, value)) = line.split_once(':') {
            match key.trim() {
                "model name" if model.is_none() => model = Some(value.trim().to_string()),
                "vendor_id" if vendor.is_none() => vendor = Some(value.trim().to_string()),
                _ => {}
            }
        }
        if model.is_some() && vendor.is_some() {
            break;
        }
    }
    Some((model.unwrap_or_default(), vendor.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullGpuProbe;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(
            StaticCapacity {
                cpu_cores_total: 8,
                storage_gb_total: 500,
                gpu_type: String::new(),
            },
            Arc::new(NullGpuProbe),
        )
    }

    #[test]
    fn capacity_snapshot_satisfies_invariant() {
        let snap = collector().collect_capacity();
        assert!(snap.validate().is_ok());
    }

    #[tokio::test]
    async fn health_downgrades_after_enough_errors() {
        let c = collector();
        for _ in 0..50 {
            c.record_error("synthetic failure");
        }
        let snap = c.collect_health().await;
        assert!(matches!(snap.status, HealthStatus::Unhealthy));
    }

    #[tokio::test]
    async fn healthy_by_default_with_no_errors() {
        let snap = collector().collect_health().await;
        assert!(matches!(snap.status, HealthStatus::Healthy | HealthStatus::Degraded));
    }

    #[tokio::test]
    async fn unreachable_target_reports_full_packet_loss() {
        let c = collector();
        let targets = vec![("peer-1".to_string(), std::net::IpAddr::from([192, 0, 2, 1]))];
        let probes = c.collect_latency(&targets).await;
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].packet_loss_percent, 100.0);
    }

    #[test]
    fn jobs_and_services_pass_through_unchanged() {
        let c = collector();
        let jobs = vec![JobSummary {
            job_id: "j1".into(),
            workload_id: "w1".into(),
            state: hpc_types::JobState::Running,
        }];
        assert_eq!(c.collect_jobs(&jobs).len(), 1);
        let services = vec![ServiceSummary {
            name: "scheduler".into(),
            healthy: true,
        }];
        assert_eq!(c.collect_services(&services).len(), 1);
    }
}
