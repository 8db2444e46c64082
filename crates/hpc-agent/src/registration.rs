//! Node registration: best-effort, idempotent, and never allowed to block
//! the heartbeat loop.

use serde::Serialize;
use tracing::{info, warn};

use hpc_types::{CapacitySnapshot, HealthSnapshot, NodeIdentity};

#[derive(Debug, Serialize)]
pub struct NodeRegistrationRequest<'a> {
    pub node_id: &'a str,
    pub cluster_id: &'a str,
    pub provider_address: &'a str,
    pub agent_public_key: &'a str,
    pub hostname: Option<&'a str>,
    pub hardware_fingerprint: Option<&'a str>,
    pub capacity: &'a CapacitySnapshot,
    pub health: &'a HealthSnapshot,
}

/// POSTs a registration request. Failures are logged and swallowed —
/// registration is re-attempted on the next non-2xx heartbeat cycle,
/// so a transient failure here is never fatal to startup.
pub async fn register(
    http: &reqwest::Client,
    daemon_base_url: &str,
    identity: &NodeIdentity,
    capacity: &CapacitySnapshot,
    health: &HealthSnapshot,
) {
    let request = NodeRegistrationRequest {
        node_id: &identity.node_id,
        cluster_id: &identity.cluster_id,
        provider_address: &identity.provider_address,
        agent_public_key: &identity.agent_public_key,
        hostname: identity.hostname.as_deref(),
        hardware_fingerprint: identity.hardware_fingerprint.as_deref(),
        capacity,
        health,
    };

    let url = format!("{daemon_base_url}/api/v1/hpc/nodes/register");
    match http.post(&url).json(&request).send().await {
        Ok(resp) if resp.status().is_success() => {
            info!(node_id = %identity.node_id, "node registered");
        }
        Ok(resp) => {
            warn!(node_id = %identity.node_id, status = %resp.status(), "registration rejected, will retry");
        }
        Err(e) => {
            warn!(node_id = %identity.node_id, error = %e, "registration request failed, will retry");
        }
    }
}
