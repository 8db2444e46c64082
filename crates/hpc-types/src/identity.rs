//! Node identity and hardware fingerprinting.

use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex;

/// Immutable identity of a cluster node, established once at agent startup.
/// The private key backing `agent_public_key` never leaves the key service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_id: String,
    pub cluster_id: String,
    pub provider_address: String,
    /// Hex-encoded Ed25519 public key.
    pub agent_public_key: String,
    pub hostname: Option<String>,
    pub hardware_fingerprint: Option<String>,
}

/// Raw hardware facts fed into the fingerprint formula. Totals are whole
/// units (cores, GB, count, GB) as declared in the data model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareFacts {
    pub cpu_model: String,
    pub cpu_vendor: String,
    pub cpu_arch: String,
    pub gpu_model: String,
    pub storage_type: String,
    pub cpu_cores_total: u32,
    pub memory_gb_total: u64,
    pub gpu_count_total: u32,
    pub storage_gb_total: u64,
}

/// Lowercase-hex SHA-256 over `cpu_model‖cpu_vendor‖cpu_arch‖gpu_model‖storage_type‖"C/M/G/S"`
/// where `C,M,G,S` are the formatted totals `%d/%d/%d/%d`.
pub fn hardware_fingerprint(facts: &HardwareFacts) -> String {
    let totals = format!(
        "{}/{}/{}/{}",
        facts.cpu_cores_total, facts.memory_gb_total, facts.gpu_count_total, facts.storage_gb_total
    );
    let mut input = String::new();
    input.push_str(&facts.cpu_model);
    input.push_str(&facts.cpu_vendor);
    input.push_str(&facts.cpu_arch);
    input.push_str(&facts.gpu_model);
    input.push_str(&facts.storage_type);
    input.push_str(&totals);
    sha256_hex(input.as_bytes())
}

impl NodeIdentity {
    pub fn new(
        node_id: impl Into<String>,
        cluster_id: impl Into<String>,
        provider_address: impl Into<String>,
        agent_public_key: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            cluster_id: cluster_id.into(),
            provider_address: provider_address.into(),
            agent_public_key: agent_public_key.into(),
            hostname: None,
            hardware_fingerprint: None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_hardware(mut self, facts: &HardwareFacts) -> Self {
        self.hardware_fingerprint = Some(hardware_fingerprint(facts));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let facts = HardwareFacts {
            cpu_model: "EPYC 7742".into(),
            cpu_vendor: "AMD".into(),
            cpu_arch: "x86_64".into(),
            gpu_model: "A100".into(),
            storage_type: "nvme".into(),
            cpu_cores_total: 64,
            memory_gb_total: 512,
            gpu_count_total: 8,
            storage_gb_total: 4000,
        };
        let a = hardware_fingerprint(&facts);
        let b = hardware_fingerprint(&facts);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn fingerprint_changes_with_totals() {
        let mut facts = HardwareFacts {
            cpu_model: "x".into(),
            cpu_vendor: "y".into(),
            cpu_arch: "z".into(),
            gpu_model: "g".into(),
            storage_type: "s".into(),
            cpu_cores_total: 4,
            memory_gb_total: 16,
            gpu_count_total: 0,
            storage_gb_total: 100,
        };
        let a = hardware_fingerprint(&facts);
        facts.cpu_cores_total = 8;
        let b = hardware_fingerprint(&facts);
        assert_ne!(a, b);
    }
}
