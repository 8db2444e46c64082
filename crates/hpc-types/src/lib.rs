//! Shared data model for the HPC node-agent coordination core.
//!
//! Every type here is pure data: construction, validation, and the
//! canonical encodings used for signatures and content hashes. Networking,
//! signing, and scheduling live in the sibling `hpc-*` crates.

pub mod canonical;
pub mod capacity;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod identity;
pub mod job;
pub mod latency;
pub mod message;
pub mod usage;

pub use canonical::{CanonicalValue, Canonicalize};
pub use capacity::{CapacitySnapshot, ResourceTriple};
pub use error::ModelError;
pub use health::{HealthSnapshot, HealthStatus, HealthThresholds};
pub use heartbeat::{Heartbeat, HeartbeatAuth, JobSummary, ServiceSummary};
pub use identity::{hardware_fingerprint, HardwareFacts, NodeIdentity};
pub use job::{JobState, Priority};
pub use latency::LatencyProbe;
pub use message::{
    AgentCapabilities, AgentMessage, HandoffRequest, HandoffResponse, JobDescriptor, MessageType,
    NeedMoreRequest, RejectionCode, RequiredCapabilities, HANDOFF_REQUEST_TTL_SECONDS,
    NEED_MORE_TTL_SECONDS,
};
pub use usage::{UsageMetrics, UsageRecord, UsageRecordType};
