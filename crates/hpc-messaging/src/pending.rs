use chrono::{DateTime, Utc};
use hpc_types::{AgentMessage, MessageType};
use tokio::sync::oneshot;

/// An outstanding request awaiting a correlated response. Removed from the
/// pending map on every exit path: delivery, timeout, or cancellation.
pub struct PendingEntry {
    pub expected_response_type: MessageType,
    pub response_tx: oneshot::Sender<AgentMessage>,
    pub expires_at: DateTime<Utc>,
}

impl PendingEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
