//! The SLURM-style scheduler and chain-recorder collaborators, used only
//! through this trait — their internals are out of scope here.

use async_trait::async_trait;

use hpc_types::UsageMetrics;

use crate::error::DriverError;

#[async_trait]
pub trait MeteringDriver: Send + Sync {
    /// Current absolute (cumulative since workload start) usage metrics.
    async fn current_metrics(&self, workload_id: &str) -> Result<UsageMetrics, DriverError>;

    /// Best-effort submission to the chain recorder. Errors are logged by
    /// the caller and never drop the record — it stays queued on the
    /// outbound channel for at-least-once redelivery.
    async fn submit_usage_record(&self, record: &hpc_types::UsageRecord) -> Result<(), DriverError>;
}

/// A driver with no backing scheduler, useful for agents that only emit
/// zero-usage records (or for tests).
pub struct NullDriver;

#[async_trait]
impl MeteringDriver for NullDriver {
    async fn current_metrics(&self, _workload_id: &str) -> Result<UsageMetrics, DriverError> {
        Ok(UsageMetrics::default())
    }

    async fn submit_usage_record(&self, _record: &hpc_types::UsageRecord) -> Result<(), DriverError> {
        Ok(())
    }
}
