//! The node agent: owns its key service, metrics collector, and message
//! handler, and drives the heartbeat loop that ties them together.
//!
//! Uses `hpc_platform`'s `ServiceRegistration`/`PlatformContext` shape for
//! cancellation fan-out across the heartbeat loop alongside the message
//! handler's own tasks.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hpc_crypto::KeyService;
use hpc_messaging::AdmissionSource;
use hpc_metrics::MetricsCollector;
use hpc_platform::{AgentMetrics, PlatformContext, ServiceRegistration};
use hpc_types::{AgentCapabilities, CapacitySnapshot, HealthSnapshot, HealthStatus, JobState, JobSummary, NodeIdentity, ServiceSummary};

use crate::commands::CommandEffect;
use crate::error::AgentError;
use crate::heartbeat::send_heartbeat;
use crate::lifecycle::AgentLifecycle;
use crate::registration::register;

const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

pub struct NodeAgent {
    identity: NodeIdentity,
    lifecycle: Mutex<AgentLifecycle>,
    http: reqwest::Client,
    daemon_base_url: String,
    key_service: Arc<KeyService>,
    collector: Arc<MetricsCollector>,
    sequence: AtomicU64,
    jobs: RwLock<Vec<JobSummary>>,
    services: RwLock<Vec<ServiceSummary>>,
    heartbeat_interval_seconds: AtomicU64,
    latency_targets: RwLock<Vec<(String, IpAddr)>>,
    supported_runtimes: Vec<String>,
    latest_health: RwLock<HealthSnapshot>,
    latest_capacity: RwLock<CapacitySnapshot>,
}

impl NodeAgent {
    pub fn new(
        identity: NodeIdentity,
        http: reqwest::Client,
        daemon_base_url: impl Into<String>,
        key_service: Arc<KeyService>,
        collector: Arc<MetricsCollector>,
        supported_runtimes: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            lifecycle: Mutex::new(AgentLifecycle::New),
            http,
            daemon_base_url: daemon_base_url.into(),
            key_service,
            collector,
            sequence: AtomicU64::new(0),
            jobs: RwLock::new(Vec::new()),
            services: RwLock::new(Vec::new()),
            heartbeat_interval_seconds: AtomicU64::new(DEFAULT_HEARTBEAT_INTERVAL_SECONDS),
            latency_targets: RwLock::new(Vec::new()),
            supported_runtimes,
            latest_health: RwLock::new(placeholder_health()),
            latest_capacity: RwLock::new(CapacitySnapshot::default()),
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn lifecycle(&self) -> AgentLifecycle {
        *self.lifecycle.lock()
    }

    pub fn set_latency_targets(&self, targets: Vec<(String, IpAddr)>) {
        *self.latency_targets.write() = targets;
    }

    pub fn set_jobs(&self, jobs: Vec<JobSummary>) {
        *self.jobs.write() = jobs;
    }

    pub fn set_services(&self, services: Vec<ServiceSummary>) {
        *self.services.write() = services;
    }

    /// `new -> registered -> running`. Rejects a start attempt on a
    /// non-`new` agent rather than silently restarting it.
    pub async fn start(self: &Arc<Self>) -> Result<(), AgentError> {
        {
            let mut state = self.lifecycle.lock();
            if *state != AgentLifecycle::New {
                return Err(AgentError::AlreadyRunning);
            }
            *state = AgentLifecycle::Registered;
        }

        let capacity = self.collector.collect_capacity();
        let health = self.collector.collect_health().await;
        register(&self.http, &self.daemon_base_url, &self.identity, &capacity, &health).await;
        *self.latest_capacity.write() = capacity;
        *self.latest_health.write() = health;

        *self.lifecycle.lock() = AgentLifecycle::Running;
        Ok(())
    }

    pub fn stop(&self) {
        *self.lifecycle.lock() = AgentLifecycle::Stopped;
    }

    /// Runs the heartbeat loop until cancelled. A single cooperative task,
    /// per spec: two in-flight heartbeats from the same agent never occur
    /// because this loop only ever awaits one tick at a time.
    async fn run_heartbeat_loop(self: Arc<Self>, metrics: Arc<AgentMetrics>, cancel: CancellationToken) {
        loop {
            let wait = Duration::from_secs(self.heartbeat_interval_seconds.load(Ordering::Relaxed));
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let (_, shutdown_requested) = self.tick_heartbeat(&metrics).await;
            if shutdown_requested {
                cancel.cancel();
            }
        }
    }

    /// Runs exactly one heartbeat cycle: snapshot, sign, send, react to the
    /// reply. The returned bool is `true` if the response carried a
    /// shutdown command. Shared by the loop above and by callers driving
    /// ticks directly (e.g. integration tests).
    pub async fn tick_heartbeat(self: &Arc<Self>, metrics: &AgentMetrics) -> (crate::heartbeat::HeartbeatResponse, bool) {
        let jobs = self.jobs.read().clone();
        let services = self.services.read().clone();
        let targets = self.latency_targets.read().clone();

        let (response, effects) = send_heartbeat(
            &self.http,
            &self.daemon_base_url,
            &self.identity,
            &self.key_service,
            &self.collector,
            &self.sequence,
            &jobs,
            &services,
            &targets,
            metrics,
        )
        .await;

        if let Some(updates) = response.config_updates.clone() {
            if let Some(interval_seconds) = updates.sampling_interval_seconds {
                self.heartbeat_interval_seconds.store(interval_seconds, Ordering::Relaxed);
            }
            if let Some(target_strings) = updates.latency_probe_targets {
                self.apply_latency_target_update(target_strings);
            }
        }

        let mut shutdown_requested = false;
        for effect in effects {
            match effect {
                CommandEffect::Shutdown => {
                    info!("received shutdown command, cancelling agent");
                    shutdown_requested = true;
                }
                CommandEffect::Drain => self.collector.set_scheduler_state("draining"),
                CommandEffect::Resume => self.collector.set_scheduler_state("idle"),
                CommandEffect::UpdateAgent | CommandEffect::RunDiagnostic | CommandEffect::Ignored => {}
            }
        }

        *self.latest_capacity.write() = self.collector.collect_capacity();
        *self.latest_health.write() = self.collector.collect_health().await;
        (response, shutdown_requested)
    }

    fn apply_latency_target_update(&self, target_strings: Vec<String>) {
        let mut parsed = Vec::with_capacity(target_strings.len());
        for entry in target_strings {
            let Some((node_id, addr)) = entry.split_once('@') else {
                warn!(entry = %entry, "malformed latency probe target, expected node_id@ip");
                continue;
            };
            match addr.parse::<IpAddr>() {
                Ok(ip) => parsed.push((node_id.to_string(), ip)),
                Err(_) => warn!(entry = %entry, "malformed latency probe target address"),
            }
        }
        *self.latency_targets.write() = parsed;
    }

    /// Wraps the heartbeat loop as a [`ServiceRegistration`] for
    /// composition with [`hpc_platform::Platform`].
    pub fn into_heartbeat_service(self: Arc<Self>) -> ServiceRegistration {
        ServiceRegistration::new(
            "heartbeat-loop",
            Arc::new(move |ctx: PlatformContext, token: CancellationToken| {
                let agent = self.clone();
                let metrics = ctx.metrics();
                tokio::spawn(async move {
                    agent.run_heartbeat_loop(metrics, token).await;
                    Ok(())
                })
            }),
        )
    }
}

impl AdmissionSource for NodeAgent {
    fn health_status(&self) -> HealthStatus {
        self.latest_health.read().status
    }

    fn available_capabilities(&self) -> AgentCapabilities {
        let capacity = self.latest_capacity.read();
        AgentCapabilities {
            available_cpu_cores: capacity.cpu_cores.available,
            available_memory_gb: capacity.memory_gb.available,
            available_gpus: capacity.gpu_count.available,
            gpu_type: capacity.gpu_type.clone(),
            supported_runtimes: self.supported_runtimes.clone(),
        }
    }

    fn running_jobs_count(&self) -> usize {
        self.jobs.read().iter().filter(|j| j.state == JobState::Running).count()
    }
}

fn placeholder_health() -> HealthSnapshot {
    HealthSnapshot {
        status: HealthStatus::Offline,
        uptime_seconds: 0,
        cpu_utilization_percent: 0.0,
        memory_utilization_percent: 0.0,
        gpu_utilization_percent: 0.0,
        gpu_memory_utilization_percent: 0.0,
        disk_io_utilization_percent: 0.0,
        network_utilization_percent: 0.0,
        cpu_temperature_celsius: None,
        gpu_temperature_celsius: None,
        error_count_24h: 0,
        warning_count_24h: 0,
        last_error: None,
        scheduler_state: "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpc_metrics::{NullGpuProbe, StaticCapacity};

    fn agent() -> Arc<NodeAgent> {
        let identity = NodeIdentity::new("n1", "c1", "0xabc", "deadbeef");
        let collector = Arc::new(MetricsCollector::new(
            StaticCapacity {
                cpu_cores_total: 8,
                storage_gb_total: 100,
                gpu_type: String::new(),
            },
            Arc::new(NullGpuProbe),
        ));
        NodeAgent::new(
            identity,
            reqwest::Client::new(),
            "http://127.0.0.1:1",
            Arc::new(KeyService::generate()),
            collector,
            vec!["singularity".into()],
        )
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let agent = agent();
        agent.start().await.unwrap();
        assert!(matches!(agent.start().await, Err(AgentError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn start_transitions_through_registered_to_running() {
        let agent = agent();
        assert_eq!(agent.lifecycle(), AgentLifecycle::New);
        agent.start().await.unwrap();
        assert_eq!(agent.lifecycle(), AgentLifecycle::Running);
    }

    #[test]
    fn stop_marks_agent_stopped() {
        let agent = agent();
        agent.stop();
        assert_eq!(agent.lifecycle(), AgentLifecycle::Stopped);
    }

    #[test]
    fn running_jobs_count_only_counts_running_state() {
        let agent = agent();
        agent.set_jobs(vec![
            JobSummary {
                job_id: "j1".into(),
                workload_id: "w1".into(),
                state: JobState::Running,
            },
            JobSummary {
                job_id: "j2".into(),
                workload_id: "w2".into(),
                state: JobState::Completed,
            },
        ]);
        assert_eq!(agent.running_jobs_count(), 1);
    }
}
