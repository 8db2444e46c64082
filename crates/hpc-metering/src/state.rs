use chrono::{DateTime, Utc};
use uuid::Uuid;

use hpc_types::UsageMetrics;

/// Per-workload metering state. Each state exclusively owns its sampling
/// timer's cancellation token — stopping the workload cancels only that
/// timer, never the others.
pub struct MeteringState {
    pub deployment_id: String,
    pub lease_id: String,
    pub pricing_inputs: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub last_cumulative_metrics: UsageMetrics,
    pub last_sequence_number: u64,
    pub last_period_end: DateTime<Utc>,
    pub last_record_id: Option<Uuid>,
    pub active: bool,
    pub closed: bool,
}

impl MeteringState {
    pub fn new(deployment_id: String, lease_id: String, pricing_inputs: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            deployment_id,
            lease_id,
            pricing_inputs,
            start_time: now,
            last_cumulative_metrics: UsageMetrics::default(),
            last_sequence_number: 0,
            last_period_end: now,
            last_record_id: None,
            active: true,
            closed: false,
        }
    }
}
