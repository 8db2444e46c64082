use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AgentSettings;
use crate::telemetry::AgentMetrics;

/// Shared, cheaply-clonable handle passed into every spawned service.
#[derive(Clone)]
pub struct PlatformContext {
    shared: Arc<SharedState>,
    shutdown: CancellationToken,
}

struct SharedState {
    config: AgentSettings,
    metrics: Arc<AgentMetrics>,
}

impl PlatformContext {
    pub(crate) fn new(config: AgentSettings, metrics: Arc<AgentMetrics>, shutdown: CancellationToken) -> Self {
        Self {
            shared: Arc::new(SharedState { config, metrics }),
            shutdown,
        }
    }

    pub fn config(&self) -> &AgentSettings {
        &self.shared.config
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
