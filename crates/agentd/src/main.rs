//! Entry point wiring the collector, key service, message handler, node
//! agent, and usage meter into a running process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::routing::post;
use axum::Router;
use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hpc_agent::NodeAgent;
use hpc_crypto::KeyService;
use hpc_messaging::MessageHandler;
use hpc_metering::{MeteringDriver, NullDriver, UsageMeter};
use hpc_metrics::{MetricsCollector, NullGpuProbe, StaticCapacity};
use hpc_platform::{AgentSettings, Platform, ServiceRegistration};
use hpc_types::AgentMessage;

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_KEY_ERROR: i32 = 2;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the agent's TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let args = Args::parse();

    let settings = match AgentSettings::load_from_path(args.config.as_ref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let key_service = match KeyService::load_from_path(&settings.keys.seed_path) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            eprintln!("key load failure: {e}");
            std::process::exit(EXIT_KEY_ERROR);
        }
    };

    if let Err(e) = run(settings, key_service).await {
        error!(error = %e, "agent exited with error");
        std::process::exit(EXIT_CONFIG_ERROR);
    }
}

async fn run(settings: AgentSettings, key_service: Arc<KeyService>) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.daemon.request_timeout_seconds))
        .build()?;

    let cpu_cores_total = if settings.capacity.cpu_cores_total > 0 {
        settings.capacity.cpu_cores_total
    } else {
        std::thread::available_parallelism().map(|n| n.get() as i64).unwrap_or(1)
    };
    let collector = Arc::new(MetricsCollector::new(
        StaticCapacity {
            cpu_cores_total,
            storage_gb_total: settings.capacity.storage_gb_total,
            gpu_type: settings.capacity.gpu_type.clone(),
        },
        Arc::new(NullGpuProbe),
    ));

    let hardware = collector.collect_hardware();
    let mut identity = hpc_types::NodeIdentity::new(
        settings.identity.node_id.clone(),
        settings.identity.cluster_id.clone(),
        settings.identity.provider_address.clone(),
        key_service.public_key_hex(),
    )
    .with_hardware(&hardware);
    if !settings.identity.hostname.is_empty() {
        identity = identity.with_hostname(settings.identity.hostname.clone());
    }

    let agent = NodeAgent::new(
        identity,
        http.clone(),
        settings.daemon.base_url.clone(),
        key_service.clone(),
        collector.clone(),
        vec!["singularity".to_string(), "docker".to_string()],
    );

    let mut platform = Platform::new(settings.clone());
    platform.register_service(agent.clone().into_heartbeat_service());
    platform.register_service(message_handler_service(
        settings.identity.node_id.clone(),
        settings.identity.cluster_id.clone(),
        http.clone(),
        settings.daemon.base_url.clone(),
        settings.daemon.inbound_port,
        agent.clone(),
    ));
    platform.register_service(usage_meter_service(
        settings.identity.node_id.clone(),
        key_service,
        settings.metering.sampling_interval_seconds,
    ));

    let runtime = platform.start().await?;
    agent.start().await?;

    info!("agent running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    agent.stop();
    runtime.shutdown().await?;
    Ok(())
}

/// Wraps the message handler's inbound HTTP surface (where the daemon
/// delivers peer messages back to this node) as a platform service.
fn message_handler_service(
    node_id: String,
    cluster_id: String,
    http: reqwest::Client,
    daemon_base_url: String,
    inbound_port: u16,
    admission: Arc<NodeAgent>,
) -> ServiceRegistration {
    ServiceRegistration::new(
        "message-handler",
        Arc::new(move |ctx: hpc_platform::PlatformContext, token: CancellationToken| {
            let node_id = node_id.clone();
            let cluster_id = cluster_id.clone();
            let http = http.clone();
            let daemon_base_url = daemon_base_url.clone();
            let admission = admission.clone();
            let metrics = ctx.metrics();
            tokio::spawn(async move {
                let outcome: Result<()> = async {
                    let handler = MessageHandler::spawn(node_id, cluster_id, http, daemon_base_url, admission, metrics, token.clone());

                    let app = Router::new()
                        .route("/api/v1/hpc/messages/inbound", post(inbound_message_handler))
                        .with_state(handler);
                    let addr = SocketAddr::from(([0, 0, 0, 0], inbound_port));
                    let listener = tokio::net::TcpListener::bind(addr).await?;
                    info!(port = inbound_port, "inbound message listener started");

                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            token.cancelled().await;
                            info!("shutting down inbound message listener");
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

async fn inbound_message_handler(
    State(handler): State<Arc<MessageHandler>>,
    axum::extract::Json(msg): axum::extract::Json<AgentMessage>,
) -> axum::http::StatusCode {
    match handler.handle_incoming_message(msg) {
        Ok(()) => axum::http::StatusCode::ACCEPTED,
        Err(e) => {
            warn!(error = %e, "rejected inbound message");
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Wraps the usage meter as a platform service; the meter's own outbound
/// channel is drained here by a best-effort logger until a real chain
/// recorder client replaces it.
fn usage_meter_service(provider_id: String, key_service: Arc<KeyService>, sampling_interval_seconds: u64) -> ServiceRegistration {
    ServiceRegistration::new(
        "usage-meter",
        Arc::new(move |ctx: hpc_platform::PlatformContext, token: CancellationToken| {
            let provider_id = provider_id.clone();
            let key_service = key_service.clone();
            let metrics = ctx.metrics();
            let driver: Arc<dyn MeteringDriver> = Arc::new(NullDriver);
            tokio::spawn(async move {
                let meter = UsageMeter::new(provider_id, driver, key_service, Duration::from_secs(sampling_interval_seconds), metrics);
                let mut outbound = meter.take_outbound_receiver().expect("receiver taken exactly once");
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        record = outbound.recv() => {
                            match record {
                                Some(record) => info!(workload_id = %record.workload_id, sequence_number = record.sequence_number, "usage record ready for chain submission"),
                                None => break,
                            }
                        }
                    }
                }
                let outcome: Result<()> = Ok(());
                outcome
            })
        }),
    )
}
