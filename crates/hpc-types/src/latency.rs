//! Latency probes: a non-restartable stream of peer-reachability samples
//! refreshed on every heartbeat tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{CanonicalValue, Canonicalize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyProbe {
    pub target_node_id: String,
    pub latency_us: u64,
    pub packet_loss_percent: f64,
    pub measured_at: DateTime<Utc>,
}

impl LatencyProbe {
    /// A probe that timed out or otherwise failed: full packet loss,
    /// zero latency, timestamped now.
    pub fn failed(target_node_id: impl Into<String>, measured_at: DateTime<Utc>) -> Self {
        Self {
            target_node_id: target_node_id.into(),
            latency_us: 0,
            packet_loss_percent: 100.0,
            measured_at,
        }
    }
}

impl Canonicalize for LatencyProbe {
    fn to_canonical(&self) -> CanonicalValue {
        CanonicalValue::Object(vec![
            ("target_node_id", CanonicalValue::Str(self.target_node_id.clone())),
            ("latency_us", CanonicalValue::UInt(self.latency_us)),
            (
                "packet_loss_percent",
                CanonicalValue::Float(self.packet_loss_percent),
            ),
            ("measured_at", CanonicalValue::Time(self.measured_at)),
        ])
    }
}
