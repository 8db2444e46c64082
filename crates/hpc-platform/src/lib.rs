//! Ambient config, telemetry, and service lifecycle wiring shared by every
//! component of the agent process.

pub mod config;
pub mod context;
pub mod runtime;
pub mod telemetry;

pub use config::AgentSettings;
pub use context::PlatformContext;
pub use runtime::{Platform, PlatformRuntime, ServiceRegistration};
pub use telemetry::AgentMetrics;
