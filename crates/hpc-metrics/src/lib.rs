//! Local node sampling: capacity, health, hardware, latency, and the
//! fast-path job/service summaries folded into each heartbeat.

pub mod collector;
pub mod error;
pub mod gpu;

pub use collector::{MetricsCollector, StaticCapacity};
pub use error::CollectError;
pub use gpu::{GpuProbe, GpuReading, NullGpuProbe, NvidiaSmiProbe};
