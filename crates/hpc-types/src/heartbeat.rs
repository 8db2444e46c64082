//! Heartbeat payload and its authentication envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{CanonicalValue, Canonicalize};
use crate::capacity::CapacitySnapshot;
use crate::health::HealthSnapshot;
use crate::job::JobState;
use crate::latency::LatencyProbe;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub workload_id: String,
    pub state: JobState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub name: String,
    pub healthy: bool,
}

/// One heartbeat tick. `sequence_number` is a strictly increasing 64-bit
/// counter owned by a single agent instance — never reset across the
/// process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    pub cluster_id: String,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub agent_version: String,
    pub capacity: CapacitySnapshot,
    pub health: HealthSnapshot,
    pub latency: Vec<LatencyProbe>,
    pub jobs: Vec<JobSummary>,
    pub services: Vec<ServiceSummary>,
}

impl Canonicalize for Heartbeat {
    /// Field order mirrors the declaration order above, per spec §6.
    fn to_canonical(&self) -> CanonicalValue {
        CanonicalValue::Object(vec![
            ("node_id", CanonicalValue::Str(self.node_id.clone())),
            ("cluster_id", CanonicalValue::Str(self.cluster_id.clone())),
            ("sequence_number", CanonicalValue::UInt(self.sequence_number)),
            ("timestamp", CanonicalValue::Time(self.timestamp)),
            ("agent_version", CanonicalValue::Str(self.agent_version.clone())),
            ("capacity", self.capacity.to_canonical()),
            ("health", self.health.to_canonical()),
            (
                "latency",
                CanonicalValue::Array(self.latency.iter().map(|p| p.to_canonical()).collect()),
            ),
            (
                "jobs",
                CanonicalValue::Array(
                    self.jobs
                        .iter()
                        .map(|j| {
                            CanonicalValue::Object(vec![
                                ("job_id", CanonicalValue::Str(j.job_id.clone())),
                                ("workload_id", CanonicalValue::Str(j.workload_id.clone())),
                                ("state", CanonicalValue::Str(format!("{:?}", j.state))),
                            ])
                        })
                        .collect(),
                ),
            ),
            (
                "services",
                CanonicalValue::Array(
                    self.services
                        .iter()
                        .map(|s| {
                            CanonicalValue::Object(vec![
                                ("name", CanonicalValue::Str(s.name.clone())),
                                ("healthy", CanonicalValue::Bool(s.healthy)),
                            ])
                        })
                        .collect(),
                ),
            ),
        ])
    }
}

/// `(signature, nonce, timestamp_unix)` attached to a signed heartbeat.
/// Signature and nonce are base64-standard encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAuth {
    pub signature: String,
    pub nonce: String,
    pub timestamp_unix: i64,
}
