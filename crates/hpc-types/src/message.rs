//! Peer agent message envelope and handoff payloads.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::job::Priority;

pub const HANDOFF_REQUEST_TTL_SECONDS: i64 = 5 * 60;
pub const NEED_MORE_TTL_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    HandoffRequest,
    HandoffResponse,
    NeedMoreRequest,
    NeedMoreResponse,
}

impl MessageType {
    pub fn is_response(&self) -> bool {
        matches!(self, MessageType::HandoffResponse | MessageType::NeedMoreResponse)
    }

    pub fn response_for(&self) -> Option<MessageType> {
        match self {
            MessageType::HandoffRequest => Some(MessageType::HandoffResponse),
            MessageType::NeedMoreRequest => Some(MessageType::NeedMoreResponse),
            _ => None,
        }
    }
}

/// Full-duplex envelope exchanged between agents (and, when `to_node_id`
/// is empty, broadcast to the provider daemon).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub from_node_id: String,
    pub to_node_id: String,
    pub cluster_id: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl AgentMessage {
    pub fn new(
        message_type: MessageType,
        from_node_id: impl Into<String>,
        to_node_id: impl Into<String>,
        cluster_id: impl Into<String>,
        priority: Priority,
        now: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        let ttl = match message_type {
            MessageType::NeedMoreRequest | MessageType::NeedMoreResponse => NEED_MORE_TTL_SECONDS,
            _ => HANDOFF_REQUEST_TTL_SECONDS,
        };
        Self {
            message_id: Uuid::new_v4(),
            message_type,
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
            cluster_id: cluster_id.into(),
            priority,
            created_at: now,
            expires_at: now + Duration::seconds(ttl),
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_node_id.is_empty()
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.expires_at <= self.created_at {
            return Err(ModelError::InvalidEnvelope(
                "expires_at must be after created_at".into(),
            ));
        }
        Ok(())
    }
}

/// Capability mins a candidate node must meet to accept a handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredCapabilities {
    pub min_memory_gb: i64,
    pub min_cpu_cores: i64,
    pub min_gpus: i64,
    pub gpu_types: Vec<String>,
    pub supported_runtimes: Vec<String>,
    pub max_task_duration_seconds: u64,
}

/// What a node can currently offer, derived from its capacity snapshot and
/// declared runtimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub available_cpu_cores: i64,
    pub available_memory_gb: i64,
    pub available_gpus: i64,
    pub gpu_type: String,
    pub supported_runtimes: Vec<String>,
}

impl RequiredCapabilities {
    /// All minimums met; GPU type intersects only when GPUs are requested
    /// and the requester named specific types.
    pub fn matches(&self, agent: &AgentCapabilities) -> bool {
        if agent.available_cpu_cores < self.min_cpu_cores {
            return false;
        }
        if agent.available_memory_gb < self.min_memory_gb {
            return false;
        }
        if agent.available_gpus < self.min_gpus {
            return false;
        }
        if self.min_gpus > 0 && !self.gpu_types.is_empty() {
            if !self.gpu_types.iter().any(|t| t == &agent.gpu_type) {
                return false;
            }
        }
        for runtime in &self.supported_runtimes {
            if !agent.supported_runtimes.contains(runtime) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub workload_id: String,
    pub runtime: String,
    pub image_or_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub required_capabilities: RequiredCapabilities,
    pub priority: Priority,
    pub job_descriptor: JobDescriptor,
    pub requested_duration_seconds: u64,
}

/// A provider daemon asking an agent for more resources than originally
/// leased. Agents never legitimately field this — only the daemon does —
/// so an agent receiving one replies with an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeedMoreRequest {
    pub workload_id: String,
    pub additional_capabilities: RequiredCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionCode {
    Unhealthy,
    Incompatible,
    Overloaded,
    LowPriority,
    QuotaExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffResponse {
    pub request_message_id: Uuid,
    pub accepted: bool,
    pub rejection_code: Option<RejectionCode>,
    pub reason: String,
    pub estimated_start_time: Option<DateTime<Utc>>,
}

impl HandoffResponse {
    pub fn accept(request_message_id: Uuid, estimated_start_time: DateTime<Utc>) -> Self {
        Self {
            request_message_id,
            accepted: true,
            rejection_code: None,
            reason: String::new(),
            estimated_start_time: Some(estimated_start_time),
        }
    }

    pub fn reject(request_message_id: Uuid, code: RejectionCode, reason: impl Into<String>) -> Self {
        Self {
            request_message_id,
            accepted: false,
            rejection_code: Some(code),
            reason: reason.into(),
            estimated_start_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(cpu: i64, mem: i64, gpus: i64, gpu_type: &str) -> AgentCapabilities {
        AgentCapabilities {
            available_cpu_cores: cpu,
            available_memory_gb: mem,
            available_gpus: gpus,
            gpu_type: gpu_type.into(),
            supported_runtimes: vec!["singularity".into()],
        }
    }

    #[test]
    fn matches_when_all_mins_met() {
        let req = RequiredCapabilities {
            min_memory_gb: 8,
            min_cpu_cores: 4,
            min_gpus: 0,
            gpu_types: vec![],
            supported_runtimes: vec![],
            max_task_duration_seconds: 3600,
        };
        assert!(req.matches(&caps(16, 64, 0, "")));
    }

    #[test]
    fn rejects_when_gpu_type_does_not_intersect() {
        let req = RequiredCapabilities {
            min_memory_gb: 0,
            min_cpu_cores: 0,
            min_gpus: 1,
            gpu_types: vec!["H100".into()],
            supported_runtimes: vec![],
            max_task_duration_seconds: 3600,
        };
        assert!(!req.matches(&caps(4, 16, 2, "A100")));
    }

    #[test]
    fn envelope_rejects_non_positive_ttl() {
        let now = Utc::now();
        let mut msg = AgentMessage::new(
            MessageType::HandoffRequest,
            "n1",
            "n2",
            "c1",
            Priority::Normal,
            now,
            serde_json::json!({}),
        );
        msg.expires_at = now;
        assert!(msg.validate().is_err());
    }
}
