//! Capacity snapshot: signed integer resource totals reported each heartbeat.

use serde::{Deserialize, Serialize};

use crate::canonical::{CanonicalValue, Canonicalize};
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceTriple {
    pub total: i64,
    pub available: i64,
    pub allocated: i64,
}

impl ResourceTriple {
    pub fn new(total: i64, available: i64, allocated: i64) -> Self {
        Self {
            total,
            available,
            allocated,
        }
    }

    /// `total == available + allocated` and `available >= 0`.
    fn validate(&self, label: &str) -> Result<(), ModelError> {
        if self.available < 0 {
            return Err(ModelError::CapacityInvariant(format!(
                "{label}.available is negative: {}",
                self.available
            )));
        }
        if self.total != self.available + self.allocated {
            return Err(ModelError::CapacityInvariant(format!(
                "{label}: total ({}) != available ({}) + allocated ({})",
                self.total, self.available, self.allocated
            )));
        }
        Ok(())
    }

    fn to_canonical(&self) -> CanonicalValue {
        CanonicalValue::Object(vec![
            ("total", CanonicalValue::Int(self.total)),
            ("available", CanonicalValue::Int(self.available)),
            ("allocated", CanonicalValue::Int(self.allocated)),
        ])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub cpu_cores: ResourceTriple,
    pub memory_gb: ResourceTriple,
    pub gpu_count: ResourceTriple,
    pub gpu_type: String,
    pub storage_gb: ResourceTriple,
}

impl CapacitySnapshot {
    pub fn validate(&self) -> Result<(), ModelError> {
        self.cpu_cores.validate("cpu_cores")?;
        self.memory_gb.validate("memory_gb")?;
        self.gpu_count.validate("gpu_count")?;
        self.storage_gb.validate("storage_gb")?;
        Ok(())
    }
}

impl Canonicalize for CapacitySnapshot {
    fn to_canonical(&self) -> CanonicalValue {
        CanonicalValue::Object(vec![
            ("cpu_cores", self.cpu_cores.to_canonical()),
            ("memory_gb", self.memory_gb.to_canonical()),
            ("gpu_count", self.gpu_count.to_canonical()),
            ("gpu_type", CanonicalValue::Str(self.gpu_type.clone())),
            ("storage_gb", self.storage_gb.to_canonical()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_snapshot_passes() {
        let snap = CapacitySnapshot {
            cpu_cores: ResourceTriple::new(16, 12, 4),
            memory_gb: ResourceTriple::new(64, 48, 16),
            gpu_count: ResourceTriple::new(2, 2, 0),
            gpu_type: "A100".into(),
            storage_gb: ResourceTriple::new(1000, 900, 100),
        };
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn mismatched_total_is_rejected() {
        let snap = CapacitySnapshot {
            cpu_cores: ResourceTriple::new(16, 10, 4),
            ..Default::default()
        };
        assert!(snap.validate().is_err());
    }

    #[test]
    fn negative_available_is_rejected() {
        let triple = ResourceTriple::new(4, -1, 5);
        let snap = CapacitySnapshot {
            cpu_cores: triple,
            ..Default::default()
        };
        assert!(snap.validate().is_err());
    }
}
