//! Signed, sequence-numbered usage records consumed by the downstream
//! settlement chain client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::{concat_atoms, sha256_hex, CanonicalValue};
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageRecordType {
    Periodic,
    Final,
    Reconciliation,
    Dispute,
}

impl UsageRecordType {
    fn as_str(&self) -> &'static str {
        match self {
            UsageRecordType::Periodic => "periodic",
            UsageRecordType::Final => "final",
            UsageRecordType::Reconciliation => "reconciliation",
            UsageRecordType::Dispute => "dispute",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub cpu_ms: u64,
    pub memory_byte_seconds: u64,
    pub storage_byte_seconds: u64,
    pub network_bytes_in: u64,
    pub network_bytes_out: u64,
    pub gpu_seconds: u64,
}

impl UsageMetrics {
    /// Component-wise delta, clamped to zero per component (a scheduler
    /// reset must never produce a negative delta).
    pub fn saturating_delta(current: &UsageMetrics, previous: &UsageMetrics) -> UsageMetrics {
        UsageMetrics {
            cpu_ms: current.cpu_ms.saturating_sub(previous.cpu_ms),
            memory_byte_seconds: current
                .memory_byte_seconds
                .saturating_sub(previous.memory_byte_seconds),
            storage_byte_seconds: current
                .storage_byte_seconds
                .saturating_sub(previous.storage_byte_seconds),
            network_bytes_in: current.network_bytes_in.saturating_sub(previous.network_bytes_in),
            network_bytes_out: current
                .network_bytes_out
                .saturating_sub(previous.network_bytes_out),
            gpu_seconds: current.gpu_seconds.saturating_sub(previous.gpu_seconds),
        }
    }

    /// True when any raw (non-saturating) component would have gone
    /// negative — the caller logs a warning when this is the case.
    pub fn any_component_regressed(current: &UsageMetrics, previous: &UsageMetrics) -> bool {
        current.cpu_ms < previous.cpu_ms
            || current.memory_byte_seconds < previous.memory_byte_seconds
            || current.storage_byte_seconds < previous.storage_byte_seconds
            || current.network_bytes_in < previous.network_bytes_in
            || current.network_bytes_out < previous.network_bytes_out
            || current.gpu_seconds < previous.gpu_seconds
    }

    pub fn dominates(&self, other: &UsageMetrics) -> bool {
        self.cpu_ms >= other.cpu_ms
            && self.memory_byte_seconds >= other.memory_byte_seconds
            && self.storage_byte_seconds >= other.storage_byte_seconds
            && self.network_bytes_in >= other.network_bytes_in
            && self.network_bytes_out >= other.network_bytes_out
            && self.gpu_seconds >= other.gpu_seconds
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub record_id: Uuid,
    pub workload_id: String,
    pub deployment_id: String,
    pub lease_id: String,
    pub provider_id: String,
    pub record_type: UsageRecordType,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metrics: UsageMetrics,
    pub cumulative_metrics: UsageMetrics,
    pub delta_metrics: UsageMetrics,
    pub signature: Option<String>,
    pub content_hash: Option<String>,
    pub sequence_number: u64,
    pub previous_record_id: Option<Uuid>,
}

impl UsageRecord {
    /// SHA-256 over the field concatenation declared in spec §6, no
    /// delimiters. Independent of `signature` so it can be computed before
    /// signing and re-verified by any holder of the record.
    pub fn compute_content_hash(&self) -> String {
        let atoms = [
            CanonicalValue::Str(self.record_id.to_string()),
            CanonicalValue::Str(self.workload_id.clone()),
            CanonicalValue::UInt(self.sequence_number),
            CanonicalValue::Time(self.period_start),
            CanonicalValue::Time(self.period_end),
            CanonicalValue::UInt(self.metrics.cpu_ms),
            CanonicalValue::UInt(self.metrics.memory_byte_seconds),
            CanonicalValue::UInt(self.metrics.storage_byte_seconds),
            CanonicalValue::UInt(self.metrics.network_bytes_in),
            CanonicalValue::UInt(self.metrics.network_bytes_out),
            CanonicalValue::UInt(self.metrics.gpu_seconds),
            CanonicalValue::Str(self.record_type.as_str().to_string()),
        ];
        sha256_hex(&concat_atoms(&atoms))
    }

    pub fn validate_against_previous(&self, previous: &UsageRecord) -> Result<(), ModelError> {
        if self.sequence_number != previous.sequence_number + 1 {
            return Err(ModelError::UsageInvariant(format!(
                "sequence_number must increase by 1, got {} after {}",
                self.sequence_number, previous.sequence_number
            )));
        }
        if !self.cumulative_metrics.dominates(&previous.cumulative_metrics) {
            return Err(ModelError::UsageInvariant(
                "cumulative_metrics regressed component-wise".into(),
            ));
        }
        let expected = UsageMetrics::saturating_delta(&self.cumulative_metrics, &previous.cumulative_metrics);
        if self.delta_metrics != expected {
            return Err(ModelError::UsageInvariant(
                "delta_metrics does not equal cumulative difference".into(),
            ));
        }
        if self.period_start != previous.period_end {
            return Err(ModelError::UsageInvariant(
                "period_start must equal the previous record's period_end".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64, cumulative: u64, start: i64, end: i64) -> UsageRecord {
        UsageRecord {
            record_id: Uuid::new_v4(),
            workload_id: "w1".into(),
            deployment_id: "d1".into(),
            lease_id: "l1".into(),
            provider_id: "p1".into(),
            record_type: UsageRecordType::Periodic,
            period_start: DateTime::from_timestamp(start, 0).unwrap(),
            period_end: DateTime::from_timestamp(end, 0).unwrap(),
            metrics: UsageMetrics::default(),
            cumulative_metrics: UsageMetrics {
                cpu_ms: cumulative,
                ..Default::default()
            },
            delta_metrics: UsageMetrics::default(),
            signature: None,
            content_hash: None,
            sequence_number: seq,
            previous_record_id: None,
        }
    }

    #[test]
    fn content_hash_is_deterministic() {
        let r = record(1, 1000, 0, 60);
        assert_eq!(r.compute_content_hash(), r.compute_content_hash());
    }

    #[test]
    fn content_hash_changes_with_sequence_number() {
        let a = record(1, 1000, 0, 60);
        let b = record(2, 1000, 0, 60);
        assert_ne!(a.compute_content_hash(), b.compute_content_hash());
    }

    #[test]
    fn tiling_and_delta_validated_against_previous() {
        let mut prev = record(1, 1000, 0, 60);
        prev.delta_metrics = UsageMetrics {
            cpu_ms: 1000,
            ..Default::default()
        };
        let mut next = record(2, 2500, 60, 120);
        next.delta_metrics = UsageMetrics {
            cpu_ms: 1500,
            ..Default::default()
        };
        assert!(next.validate_against_previous(&prev).is_ok());
    }

    #[test]
    fn gap_in_sequence_is_rejected() {
        let prev = record(1, 1000, 0, 60);
        let next = record(3, 2000, 60, 120);
        assert!(next.validate_against_previous(&prev).is_err());
    }
}
