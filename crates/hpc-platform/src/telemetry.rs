//! `/metrics` endpoint exposing agent-internal counters, backed by real
//! atomics the rest of the process increments as it runs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ObservabilitySettings;
use crate::runtime::ServiceRegistration;

#[derive(Default)]
pub struct AgentMetrics {
    heartbeats_sent: AtomicU64,
    heartbeats_failed: AtomicU64,
    handoffs_accepted: AtomicU64,
    handoffs_rejected: AtomicU64,
    usage_records_emitted: AtomicU64,
}

impl AgentMetrics {
    pub fn record_heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat_failed(&self) {
        self.heartbeats_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handoff_accepted(&self) {
        self.handoffs_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handoff_rejected(&self) {
        self.handoffs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_usage_record_emitted(&self) {
        self.usage_records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    pub fn handoffs_accepted(&self) -> u64 {
        self.handoffs_accepted.load(Ordering::Relaxed)
    }

    pub fn handoffs_rejected(&self) -> u64 {
        self.handoffs_rejected.load(Ordering::Relaxed)
    }

    pub fn usage_records_emitted(&self) -> u64 {
        self.usage_records_emitted.load(Ordering::Relaxed)
    }

    fn render(&self) -> String {
        format!(
            "# HELP hpcagent_heartbeats_sent_total Heartbeats successfully delivered\n\
             # TYPE hpcagent_heartbeats_sent_total counter\n\
             hpcagent_heartbeats_sent_total {}\n\
             # HELP hpcagent_heartbeats_failed_total Heartbeats that failed or timed out\n\
             # TYPE hpcagent_heartbeats_failed_total counter\n\
             hpcagent_heartbeats_failed_total {}\n\
             # HELP hpcagent_handoffs_accepted_total Inbound handoff requests accepted\n\
             # TYPE hpcagent_handoffs_accepted_total counter\n\
             hpcagent_handoffs_accepted_total {}\n\
             # HELP hpcagent_handoffs_rejected_total Inbound handoff requests rejected\n\
             # TYPE hpcagent_handoffs_rejected_total counter\n\
             hpcagent_handoffs_rejected_total {}\n\
             # HELP hpcagent_usage_records_emitted_total Signed usage records emitted\n\
             # TYPE hpcagent_usage_records_emitted_total counter\n\
             hpcagent_usage_records_emitted_total {}\n",
            self.heartbeats_sent.load(Ordering::Relaxed),
            self.heartbeats_failed.load(Ordering::Relaxed),
            self.handoffs_accepted.load(Ordering::Relaxed),
            self.handoffs_rejected.load(Ordering::Relaxed),
            self.usage_records_emitted.load(Ordering::Relaxed),
        )
    }
}

pub fn telemetry_service(settings: ObservabilitySettings) -> ServiceRegistration {
    ServiceRegistration::new(
        "telemetry",
        Arc::new(move |ctx, token: CancellationToken| {
            let settings = settings.clone();
            tokio::spawn(async move {
                let outcome: Result<()> = async {
                    if !settings.enable_metrics {
                        return Ok(());
                    }

                    let app = Router::new()
                        .route("/metrics", get(metrics_handler))
                        .with_state(ctx.metrics());
                    let addr = SocketAddr::from(([0, 0, 0, 0], settings.metrics_port));
                    let shutdown = token.clone();

                    let listener = tokio::net::TcpListener::bind(addr).await?;
                    info!(port = settings.metrics_port, "telemetry server started");

                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            shutdown.cancelled().await;
                            info!("shutting down telemetry server");
                        })
                        .await?;

                    Ok(())
                }
                .await;

                outcome
            })
        }),
    )
}

async fn metrics_handler(State(metrics): State<Arc<AgentMetrics>>) -> String {
    metrics.render()
}
