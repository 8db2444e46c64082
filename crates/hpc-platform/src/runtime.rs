use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AgentSettings;
use crate::context::PlatformContext;
use crate::telemetry::{telemetry_service, AgentMetrics};

pub type ServiceSpawner =
    Arc<dyn Fn(PlatformContext, CancellationToken) -> JoinHandle<Result<()>> + Send + Sync + 'static>;

/// A named, cancellable long-running task (heartbeat loop, message handler,
/// metering timer, the ambient telemetry server) registered with [`Platform`]
/// before it starts.
pub struct ServiceRegistration {
    name: String,
    spawner: ServiceSpawner,
}

impl ServiceRegistration {
    pub fn new<N: Into<String>>(name: N, spawner: ServiceSpawner) -> Self {
        Self {
            name: name.into(),
            spawner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spawn(&self, context: PlatformContext, token: CancellationToken) -> JoinHandle<Result<()>> {
        (self.spawner)(context, token)
    }
}

/// Composes the ambient telemetry service with whatever domain services
/// (heartbeat loop, message handler tasks, metering timers) the binary
/// registers, and fans a single root cancellation token out to all of them.
pub struct Platform {
    config: AgentSettings,
    metrics: Arc<AgentMetrics>,
    services: Vec<ServiceRegistration>,
}

impl Platform {
    pub fn new(config: AgentSettings) -> Self {
        let metrics = Arc::new(AgentMetrics::default());
        let services = vec![telemetry_service(config.observability.clone())];
        Self {
            config,
            metrics,
            services,
        }
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn register_service(&mut self, service: ServiceRegistration) {
        self.services.push(service);
    }

    pub fn init_logging(&self) {
        let filter = &self.config.observability.log_level;
        let _ = tracing_subscriber::fmt().with_env_filter(filter.as_str()).try_init();
    }

    pub async fn start(self) -> Result<PlatformRuntime> {
        self.init_logging();

        let root_token = CancellationToken::new();
        let context = PlatformContext::new(self.config.clone(), Arc::clone(&self.metrics), root_token.child_token());

        let mut tasks = Vec::new();
        for service in self.services {
            let handle = service.spawn(context.clone(), root_token.child_token());
            tasks.push((service.name().to_string(), handle));
        }

        info!("agent platform boot completed");

        Ok(PlatformRuntime {
            context,
            cancel_token: root_token,
            tasks,
        })
    }
}

pub struct PlatformRuntime {
    context: PlatformContext,
    cancel_token: CancellationToken,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl PlatformRuntime {
    pub fn context(&self) -> PlatformContext {
        self.context.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();

        for (name, handle) in self.tasks {
            match handle.await {
                Ok(Ok(())) => info!(service = %name, "service shutdown cleanly"),
                Ok(Err(err)) => return Err(err),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}
