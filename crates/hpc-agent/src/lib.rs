//! Node agent lifecycle: registration, the heartbeat loop, and command
//! processing, composed from the key, metrics, and messaging crates.

pub mod agent;
pub mod commands;
pub mod error;
pub mod heartbeat;
pub mod lifecycle;
pub mod registration;

pub use agent::NodeAgent;
pub use commands::{AgentCommand, CommandEffect, CommandType};
pub use error::AgentError;
pub use heartbeat::{ConfigUpdates, HeartbeatResponse};
pub use lifecycle::AgentLifecycle;
