//! Heartbeat tick: snapshot, sign, send, and react to the daemon's reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use hpc_crypto::KeyService;
use hpc_metrics::MetricsCollector;
use hpc_platform::AgentMetrics;
use hpc_types::{Canonicalize, Heartbeat, HeartbeatAuth, JobSummary, NodeIdentity, ServiceSummary};

use crate::commands::{process_commands, AgentCommand, CommandEffect};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const HEARTBEAT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const SYNTHETIC_RETRY_SECONDS: u64 = 30;

#[derive(Debug, Serialize)]
struct HeartbeatEnvelope<'a> {
    heartbeat: &'a Heartbeat,
    auth: &'a HeartbeatAuth,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigUpdates {
    pub sampling_interval_seconds: Option<u64>,
    pub latency_probe_targets: Option<Vec<String>>,
    pub metrics_retention_seconds: Option<u64>,
}

impl Default for ConfigUpdates {
    fn default() -> Self {
        Self {
            sampling_interval_seconds: None,
            latency_probe_targets: None,
            metrics_retention_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatResponse {
    pub accepted: bool,
    pub next_heartbeat_seconds: u64,
    pub error_code: Option<String>,
    pub commands: Vec<AgentCommand>,
    pub config_updates: Option<ConfigUpdates>,
}

impl Default for HeartbeatResponse {
    fn default() -> Self {
        Self {
            accepted: true,
            next_heartbeat_seconds: SYNTHETIC_RETRY_SECONDS,
            error_code: None,
            commands: Vec::new(),
            config_updates: None,
        }
    }
}

impl HeartbeatResponse {
    fn synthetic_failure(error_code: &'static str) -> Self {
        Self {
            accepted: false,
            next_heartbeat_seconds: SYNTHETIC_RETRY_SECONDS,
            error_code: Some(error_code.to_string()),
            commands: Vec::new(),
            config_updates: None,
        }
    }
}

/// Assembles, signs, and sends one heartbeat; returns the daemon's
/// response (real or synthesized on failure) plus the processed command
/// effects. Never returns `Err` — every failure mode is absorbed into a
/// synthetic response so the loop never crashes.
pub async fn send_heartbeat(
    http: &reqwest::Client,
    daemon_base_url: &str,
    identity: &NodeIdentity,
    key_service: &KeyService,
    collector: &MetricsCollector,
    sequence: &AtomicU64,
    jobs: &[JobSummary],
    services: &[ServiceSummary],
    latency_targets: &[(String, std::net::IpAddr)],
    metrics: &AgentMetrics,
) -> (HeartbeatResponse, Vec<CommandEffect>) {
    let capacity = collector.collect_capacity();
    let health = collector.collect_health().await;
    let latency = collector.collect_latency(latency_targets).await;
    let sequence_number = sequence.fetch_add(1, Ordering::SeqCst) + 1;

    let heartbeat = Heartbeat {
        node_id: identity.node_id.clone(),
        cluster_id: identity.cluster_id.clone(),
        sequence_number,
        timestamp: Utc::now(),
        agent_version: AGENT_VERSION.to_string(),
        capacity,
        health,
        latency,
        jobs: collector.collect_jobs(jobs),
        services: collector.collect_services(services),
    };

    let canonical_bytes = heartbeat.canonical_bytes();
    let signature = match key_service.sign(&canonical_bytes) {
        Ok(sig) => sig,
        Err(e) => {
            error!(error = %e, "cannot sign heartbeat, key unavailable");
            metrics.record_heartbeat_failed();
            return (HeartbeatResponse::synthetic_failure("key_unavailable"), Vec::new());
        }
    };

    // Nonce is the first 16 bytes of the canonical serialization, not random:
    // the daemon re-derives it the same way to bind the auth envelope to this
    // exact heartbeat body.
    let nonce_bytes = &canonical_bytes[..16.min(canonical_bytes.len())];
    let auth = HeartbeatAuth {
        signature: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature),
        nonce: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, nonce_bytes),
        timestamp_unix: Utc::now().timestamp(),
    };

    let url = format!("{daemon_base_url}/api/v1/hpc/nodes/{}/heartbeat", identity.node_id);
    let envelope = HeartbeatEnvelope {
        heartbeat: &heartbeat,
        auth: &auth,
    };

    let response = http
        .post(&url)
        .timeout(std::time::Duration::from_secs(HEARTBEAT_REQUEST_TIMEOUT_SECONDS))
        .json(&envelope)
        .send()
        .await;

    let parsed = match response {
        Ok(resp) if resp.status().is_success() => match resp.json::<HeartbeatResponse>().await {
            Ok(body) => {
                metrics.record_heartbeat_sent();
                body
            }
            Err(e) => {
                warn!(error = %e, "heartbeat response body malformed");
                metrics.record_heartbeat_failed();
                HeartbeatResponse::synthetic_failure("http_error")
            }
        },
        Ok(resp) => {
            warn!(status = %resp.status(), "heartbeat rejected by daemon");
            metrics.record_heartbeat_failed();
            HeartbeatResponse::synthetic_failure("http_error")
        }
        Err(e) => {
            warn!(error = %e, "heartbeat request failed");
            metrics.record_heartbeat_failed();
            HeartbeatResponse::synthetic_failure("connection_failed")
        }
    };

    let effects = process_commands(&parsed.commands, Utc::now());
    if !effects.is_empty() {
        info!(count = effects.len(), "processed heartbeat commands");
    }

    (parsed, effects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_failure_is_never_accepted() {
        let resp = HeartbeatResponse::synthetic_failure("connection_failed");
        assert!(!resp.accepted);
        assert_eq!(resp.next_heartbeat_seconds, SYNTHETIC_RETRY_SECONDS);
        assert_eq!(resp.error_code.as_deref(), Some("connection_failed"));
    }

    #[test]
    fn default_response_has_no_commands() {
        assert!(HeartbeatResponse::default().commands.is_empty());
    }
}
