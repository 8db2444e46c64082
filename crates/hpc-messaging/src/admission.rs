//! Handoff admission evaluation — the ordered checks an agent runs before
//! accepting a peer's work.

use chrono::{DateTime, Duration, Utc};

use hpc_types::{AgentCapabilities, HandoffRequest, HandoffResponse, HealthStatus, Priority, RejectionCode};
use uuid::Uuid;

const MIN_AVAILABLE_CPU_CORES: i64 = 2;
const MIN_AVAILABLE_MEMORY_GB: i64 = 4;
const MAX_RUNNING_JOBS_FOR_LOW_PRIORITY: usize = 5;
const ESTIMATED_START_DELAY_SECONDS: i64 = 30;

/// Supplies the live state an admission decision needs, without coupling
/// the message handler to the node agent's concrete type.
pub trait AdmissionSource: Send + Sync {
    fn health_status(&self) -> HealthStatus;
    fn available_capabilities(&self) -> AgentCapabilities;
    fn running_jobs_count(&self) -> usize;
}

/// Ordered checks from the handoff admission contract; the first failure
/// short-circuits the rest.
pub fn evaluate_admission(
    request_message_id: Uuid,
    request: &HandoffRequest,
    source: &dyn AdmissionSource,
    now: DateTime<Utc>,
) -> HandoffResponse {
    if !matches!(source.health_status(), HealthStatus::Healthy) {
        return HandoffResponse::reject(request_message_id, RejectionCode::Unhealthy, "node is not healthy");
    }

    let caps = source.available_capabilities();
    if !request.required_capabilities.matches(&caps) {
        return HandoffResponse::reject(
            request_message_id,
            RejectionCode::Incompatible,
            "required capabilities not met",
        );
    }

    if caps.available_cpu_cores < MIN_AVAILABLE_CPU_CORES || caps.available_memory_gb < MIN_AVAILABLE_MEMORY_GB {
        return HandoffResponse::reject(request_message_id, RejectionCode::Overloaded, "insufficient headroom");
    }

    if request.priority < Priority::Normal && source.running_jobs_count() >= MAX_RUNNING_JOBS_FOR_LOW_PRIORITY {
        return HandoffResponse::reject(
            request_message_id,
            RejectionCode::LowPriority,
            "too many running jobs for a low-priority request",
        );
    }

    HandoffResponse::accept(request_message_id, now + Duration::seconds(ESTIMATED_START_DELAY_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpc_types::{JobDescriptor, RequiredCapabilities};

    struct FakeSource {
        health: HealthStatus,
        caps: AgentCapabilities,
        running_jobs: usize,
    }

    impl AdmissionSource for FakeSource {
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

    fn request(priority: Priority) -> HandoffRequest {
        HandoffRequest {
            required_capabilities: RequiredCapabilities {
                min_memory_gb: 4,
                min_cpu_cores: 2,
                min_gpus: 0,
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

    fn healthy_source(available_cpu: i64, available_mem: i64, running_jobs: usize) -> FakeSource {
        FakeSource {
            health: HealthStatus::Healthy,
            caps: AgentCapabilities {
                available_cpu_cores: available_cpu,
                available_memory_gb: available_mem,
                available_gpus: 0,
                gpu_type: String::new(),
                supported_runtimes: vec![],
            },
            running_jobs,
        }
    }

    #[test]
    fn unhealthy_node_rejects_before_any_other_check() {
        let mut source = healthy_source(16, 64, 0);
        source.health = HealthStatus::Degraded;
        let resp = evaluate_admission(Uuid::new_v4(), &request(Priority::Normal), &source, Utc::now());
        assert_eq!(resp.rejection_code, Some(RejectionCode::Unhealthy));
    }

    #[test]
    fn overloaded_when_headroom_below_minimum() {
        let source = healthy_source(1, 64, 0);
        let resp = evaluate_admission(Uuid::new_v4(), &request(Priority::Normal), &source, Utc::now());
        assert_eq!(resp.rejection_code, Some(RejectionCode::Overloaded));
    }

    #[test]
    fn low_priority_rejected_under_load() {
        let source = healthy_source(16, 64, 5);
        let resp = evaluate_admission(Uuid::new_v4(), &request(Priority::Low), &source, Utc::now());
        assert_eq!(resp.rejection_code, Some(RejectionCode::LowPriority));
    }

    #[test]
    fn accepted_when_all_checks_pass() {
        let source = healthy_source(16, 64, 0);
        let resp = evaluate_admission(Uuid::new_v4(), &request(Priority::Normal), &source, Utc::now());
        assert!(resp.accepted);
        assert!(resp.estimated_start_time.is_some());
    }
}
