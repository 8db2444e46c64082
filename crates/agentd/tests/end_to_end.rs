//! End-to-end scenarios against an in-process fake daemon: the six
//! scenarios named for the coordination core (heartbeat cadence, handoff
//! admission outcomes, usage record tiling, signature forgery rejection).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use hpc_agent::NodeAgent;
use hpc_crypto::KeyService;
use hpc_messaging::{evaluate_admission, AdmissionSource};
use hpc_metering::{DriverError, MeteringDriver, UsageMeter};
use hpc_metrics::{MetricsCollector, NullGpuProbe, StaticCapacity};
use hpc_types::{
    AgentCapabilities, Canonicalize, HandoffRequest, HealthStatus, JobDescriptor, NodeIdentity,
    Priority, RejectionCode, RequiredCapabilities, UsageMetrics,
};

struct FakeDaemon {
    heartbeats: Mutex<Vec<Value>>,
}

async fn fake_heartbeat_handler(
    State(daemon): State<Arc<FakeDaemon>>,
    Path(_node_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    daemon.heartbeats.lock().push(body.clone());
    let sequence_ack = body["heartbeat"]["sequence_number"].clone();
    Json(json!({
        "accepted": true,
        "sequence_ack": sequence_ack,
        "timestamp": Utc::now().to_rfc3339(),
        "next_heartbeat_seconds": 30,
        "commands": [],
    }))
}

async fn fake_register_handler() -> axum::http::StatusCode {
    axum::http::StatusCode::OK
}

async fn spawn_fake_daemon() -> (SocketAddr, Arc<FakeDaemon>) {
    let daemon = Arc::new(FakeDaemon {
        heartbeats: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/api/v1/hpc/nodes/register", post(fake_register_handler))
        .route("/api/v1/hpc/nodes/:node_id/heartbeat", post(fake_heartbeat_handler))
        .with_state(daemon.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, daemon)
}

fn test_agent(daemon_base_url: String) -> Arc<NodeAgent> {
    let identity = NodeIdentity::new("n1", "c1", "0xprovider", "deadbeef");
    let collector = Arc::new(MetricsCollector::new(
        StaticCapacity {
            cpu_cores_total: 16,
            storage_gb_total: 500,
            gpu_type: String::new(),
        },
        Arc::new(NullGpuProbe),
    ));
    NodeAgent::new(
        identity,
        reqwest::Client::new(),
        daemon_base_url,
        Arc::new(KeyService::generate()),
        collector,
        vec!["singularity".to_string()],
    )
}

/// Scenario 1: heartbeat happy path — three ticks produce three POSTs with
/// sequence numbers 1, 2, 3 and non-decreasing timestamps.
#[tokio::test]
async fn heartbeat_happy_path_sends_monotonic_sequence_numbers() {
    let (addr, daemon) = spawn_fake_daemon().await;
    let agent = test_agent(format!("http://{addr}"));
    agent.start().await.unwrap();

    let metrics = hpc_platform::AgentMetrics::default();
    for expected_seq in 1..=3u64 {
        let (response, shutdown_requested) = agent.tick_heartbeat(&metrics).await;
        assert!(response.accepted);
        assert!(!shutdown_requested);
        let seq = daemon.heartbeats.lock().last().unwrap()["heartbeat"]["sequence_number"]
            .as_u64()
            .unwrap();
        assert_eq!(seq, expected_seq);
    }

    let recorded = daemon.heartbeats.lock();
    assert_eq!(recorded.len(), 3);
    let mut last_ts: Option<String> = None;
    for beat in recorded.iter() {
        let ts = beat["heartbeat"]["timestamp"].as_str().unwrap().to_string();
        if let Some(prev) = &last_ts {
            assert!(ts.as_str() >= prev.as_str());
        }
        last_ts = Some(ts);
    }
}

struct FixedSource {
    health: HealthStatus,
    caps: AgentCapabilities,
    running_jobs: usize,
}

impl AdmissionSource for FixedSource {
    fn health_status(&self) -> HealthStatus {
        self.health
    }
    fn available_capabilities(&self) -> AgentCapabilities {
        self.caps.clone()
    }
    fn running_jobs_count(&self) -> usize {
        self.running_jobs
    }
}

fn handoff_request(priority: Priority, min_cpu: i64, min_mem: i64, min_gpus: i64) -> HandoffRequest {
    HandoffRequest {
        required_capabilities: RequiredCapabilities {
            min_memory_gb: min_mem,
            min_cpu_cores: min_cpu,
            min_gpus,
            gpu_types: vec![],
            supported_runtimes: vec![],
            max_task_duration_seconds: 3600,
        },
        priority,
        job_descriptor: JobDescriptor {
            job_id: "j1".into(),
            workload_id: "w1".into(),
            runtime: "singularity".into(),
            image_or_command: "echo hi".into(),
        },
        requested_duration_seconds: 60,
    }
}

/// Scenario 2: handoff accepted on a healthy, well-provisioned node.
#[test]
fn handoff_accepted_on_healthy_well_provisioned_node() {
    let source = FixedSource {
        health: HealthStatus::Healthy,
        caps: AgentCapabilities {
            available_cpu_cores: 16,
            available_memory_gb: 64,
            available_gpus: 0,
            gpu_type: String::new(),
            supported_runtimes: vec![],
        },
        running_jobs: 0,
    };
    let now = Utc::now();
    let response = evaluate_admission(Uuid::new_v4(), &handoff_request(Priority::Normal, 4, 8, 0), &source, now);
    assert!(response.accepted);
    assert!(response.rejection_code.is_none());
    let estimated = response.estimated_start_time.unwrap();
    let delta = (estimated - now).num_seconds();
    assert!((28..=32).contains(&delta), "expected ~30s, got {delta}");
}

/// Scenario 3: handoff rejected as incompatible when GPUs are requested but unavailable.
#[test]
fn handoff_rejected_incompatible_when_gpus_unavailable() {
    let source = FixedSource {
        health: HealthStatus::Healthy,
        caps: AgentCapabilities {
            available_cpu_cores: 16,
            available_memory_gb: 64,
            available_gpus: 0,
            gpu_type: String::new(),
            supported_runtimes: vec![],
        },
        running_jobs: 0,
    };
    let response = evaluate_admission(Uuid::new_v4(), &handoff_request(Priority::Normal, 2, 4, 2), &source, Utc::now());
    assert!(!response.accepted);
    assert_eq!(response.rejection_code, Some(RejectionCode::Incompatible));
}

/// Scenario 4: handoff rejected as low priority under load.
#[test]
fn handoff_rejected_low_priority_under_load() {
    let source = FixedSource {
        health: HealthStatus::Healthy,
        caps: AgentCapabilities {
            available_cpu_cores: 16,
            available_memory_gb: 64,
            available_gpus: 0,
            gpu_type: String::new(),
            supported_runtimes: vec![],
        },
        running_jobs: 6,
    };
    let response = evaluate_admission(Uuid::new_v4(), &handoff_request(Priority::Low, 2, 4, 0), &source, Utc::now());
    assert!(!response.accepted);
    assert_eq!(response.rejection_code, Some(RejectionCode::LowPriority));
}

struct ScriptedDriver {
    cumulative_cpu_ms: Vec<u64>,
    call: AtomicU64,
}

#[async_trait]
impl MeteringDriver for ScriptedDriver {
    async fn current_metrics(&self, _workload_id: &str) -> Result<UsageMetrics, DriverError> {
        let idx = self.call.fetch_add(1, Ordering::SeqCst) as usize;
        let cpu_ms = *self.cumulative_cpu_ms.get(idx).unwrap_or(self.cumulative_cpu_ms.last().unwrap());
        Ok(UsageMetrics {
            cpu_ms,
            ..Default::default()
        })
    }

    async fn submit_usage_record(&self, _record: &hpc_types::UsageRecord) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Scenario 5: usage record tiling — sequence numbers and deltas track the
/// driver's scripted cumulative readings, and `StopMetering` closes the
/// sequence with a final record.
#[tokio::test]
async fn usage_record_tiling_matches_scripted_driver_readings() {
    let driver = Arc::new(ScriptedDriver {
        cumulative_cpu_ms: vec![1000, 2500, 4000],
        call: AtomicU64::new(0),
    });
    let meter = UsageMeter::new(
        "provider-1",
        driver,
        Arc::new(KeyService::generate()),
        std::time::Duration::from_secs(3600),
        Arc::new(hpc_platform::AgentMetrics::default()),
    );
    meter.start_metering("w1", "d1", "l1", json!({})).unwrap();

    let r1 = meter.force_collect("w1").await.unwrap();
    let r2 = meter.force_collect("w1").await.unwrap();
    let r3 = meter.force_collect("w1").await.unwrap();

    assert_eq!(r1.sequence_number, 1);
    assert_eq!(r1.metrics.cpu_ms, 1000);
    assert_eq!(r2.sequence_number, 2);
    assert_eq!(r2.metrics.cpu_ms, 1500);
    assert_eq!(r3.sequence_number, 3);
    assert_eq!(r3.metrics.cpu_ms, 1500);
    assert_eq!(r2.period_start, r1.period_end);
    assert_eq!(r3.period_start, r2.period_end);

    let final_record = meter.stop_metering("w1").await.unwrap();
    assert_eq!(final_record.sequence_number, 4);
    assert_eq!(final_record.record_type, hpc_types::UsageRecordType::Final);
    assert!(meter.force_collect("w1").await.is_err());
}

/// Scenario 6: signature forgery rejection for both the signature and the
/// signed bytes.
#[test]
fn signature_forgery_is_rejected_on_either_field() {
    let identity = NodeIdentity::new("n1", "c1", "0xprovider", "deadbeef");
    let key_service = KeyService::generate();
    let heartbeat = hpc_types::Heartbeat {
        node_id: identity.node_id.clone(),
        cluster_id: identity.cluster_id.clone(),
        sequence_number: 1,
        timestamp: Utc::now(),
        agent_version: "0.1.0".to_string(),
        capacity: Default::default(),
        health: hpc_types::HealthSnapshot {
            status: HealthStatus::Healthy,
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
            scheduler_state: "idle".to_string(),
        },
        latency: vec![],
        jobs: vec![],
        services: vec![],
    };
    let bytes = heartbeat.canonical_bytes();
    let mut signature = key_service.sign(&bytes).unwrap();

    assert!(KeyService::verify(&key_service.public_key_hex(), &bytes, &signature));

    signature[0] ^= 0xFF;
    assert!(!KeyService::verify(&key_service.public_key_hex(), &bytes, &signature));

    let sig_again = key_service.sign(&bytes).unwrap();
    let mut tampered_bytes = bytes.clone();
    tampered_bytes[0] ^= 0xFF;
    assert!(!KeyService::verify(&key_service.public_key_hex(), &tampered_bytes, &sig_again));
}
