//! Full-duplex peer message delivery: send with correlated responses,
//! receive with inbox dispatch, and a sweeper that expires stale requests.
//!
//! A `parking_lot::RwLock`-guarded map behind an `Arc` tracks in-flight
//! requests awaiting a correlated response, with an expiry sweeper.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hpc_platform::AgentMetrics;
use hpc_types::{
    AgentMessage, HandoffRequest, HandoffResponse, MessageType, NeedMoreRequest, Priority,
};

use crate::admission::{evaluate_admission, AdmissionSource};
use crate::error::MessagingError;
use crate::pending::PendingEntry;

const INBOX_CAPACITY: usize = 100;
const OUTBOX_CONCURRENCY: usize = 100;
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Full-duplex message handler. Owns the pending-response map; the inbox
/// processor and expiry sweeper run as long-lived tasks spawned by
/// [`MessageHandler::spawn`].
pub struct MessageHandler {
    node_id: String,
    cluster_id: String,
    http: Client,
    daemon_base_url: String,
    inbox_tx: mpsc::Sender<AgentMessage>,
    /// Bounds concurrent outgoing sends to the outbox's declared capacity,
    /// without a dedicated drain task.
    outbox_permits: Arc<Semaphore>,
    pending: Arc<RwLock<HashMap<Uuid, PendingEntry>>>,
    admission: Arc<dyn AdmissionSource>,
    metrics: Arc<AgentMetrics>,
}

impl MessageHandler {
    /// Construct the handler and spawn its two long-lived tasks: the
    /// inbox processor and the expiry sweeper.
    pub fn spawn(
        node_id: impl Into<String>,
        cluster_id: impl Into<String>,
        http: Client,
        daemon_base_url: impl Into<String>,
        admission: Arc<dyn AdmissionSource>,
        metrics: Arc<AgentMetrics>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let handler = Arc::new(Self {
            node_id: node_id.into(),
            cluster_id: cluster_id.into(),
            http,
            daemon_base_url: daemon_base_url.into(),
            inbox_tx,
            outbox_permits: Arc::new(Semaphore::new(OUTBOX_CONCURRENCY)),
            pending: Arc::new(RwLock::new(HashMap::new())),
            admission,
            metrics,
        });

        handler.clone().spawn_inbox_processor(inbox_rx, cancel.clone());
        handler.clone().spawn_expiry_sweeper(cancel);
        handler
    }

    fn spawn_inbox_processor(self: Arc<Self>, mut inbox_rx: mpsc::Receiver<AgentMessage>, cancel: CancellationToken) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("inbox processor shutting down");
                        break;
                    }
                    maybe_msg = inbox_rx.recv() => {
                        match maybe_msg {
                            Some(msg) => self.dispatch(msg).await,
                            None => break,
                        }
                    }
                }
            }
        });
    }

    fn spawn_expiry_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("expiry sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep_expired();
                    }
                }
            }
        });
    }

    fn sweep_expired(&self) {
        let now = Utc::now();
        let mut pending = self.pending.write();
        let expired: Vec<Uuid> = pending
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            // Dropping the sender closes the waiter's channel; the waiter
            // reinterprets the resulting recv error as a timeout.
            pending.remove(&id);
        }
    }

    /// Enqueue an incoming peer/daemon message onto the inbox. Rejects
    /// with `InboxFull` rather than blocking the caller.
    pub fn handle_incoming_message(&self, msg: AgentMessage) -> Result<(), MessagingError> {
        self.inbox_tx.try_send(msg).map_err(|_| MessagingError::InboxFull)
    }

    async fn dispatch(&self, msg: AgentMessage) {
        if msg.message_type.is_response() {
            self.dispatch_response(msg);
            return;
        }

        match msg.message_type {
            MessageType::HandoffRequest => self.dispatch_handoff_request(msg).await,
            MessageType::NeedMoreRequest => self.dispatch_need_more_request(msg).await,
            _ => {}
        }
    }

    fn dispatch_response(&self, msg: AgentMessage) {
        let Some(request_message_id) = msg
            .payload
            .get("request_message_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            warn!("response payload missing request_message_id, dropping");
            return;
        };

        let entry = self.pending.write().remove(&request_message_id);
        match entry {
            Some(entry) => {
                // Non-blocking by construction: oneshot::send never awaits.
                // A closed receiver (caller already timed out/cancelled)
                // is not an error — just drop the response.
                let _ = entry.response_tx.send(msg);
            }
            None => debug!(%request_message_id, "response correlates to no pending request, dropping"),
        }
    }

    async fn dispatch_handoff_request(&self, msg: AgentMessage) {
        let response = match serde_json::from_value::<HandoffRequest>(msg.payload.clone()) {
            Ok(request) => evaluate_admission(msg.message_id, &request, self.admission.as_ref(), Utc::now()),
            Err(e) => {
                warn!(error = %e, "malformed handoff request payload");
                HandoffResponse::reject(
                    msg.message_id,
                    hpc_types::RejectionCode::Incompatible,
                    "malformed request payload",
                )
            }
        };

        if response.accepted {
            self.metrics.record_handoff_accepted();
        } else {
            self.metrics.record_handoff_rejected();
        }

        self.reply(&msg, MessageType::HandoffResponse, &response).await;
    }

    async fn dispatch_need_more_request(&self, msg: AgentMessage) {
        if serde_json::from_value::<NeedMoreRequest>(msg.payload.clone()).is_err() {
            warn!("malformed need-more-request payload");
        }
        let response = HandoffResponse::reject(
            msg.message_id,
            hpc_types::RejectionCode::Incompatible,
            "agents do not field NeedMoreRequest; only the provider daemon does",
        );
        self.reply(&msg, MessageType::NeedMoreResponse, &response).await;
    }

    async fn reply(&self, original: &AgentMessage, response_type: MessageType, response: &HandoffResponse) {
        let Ok(payload) = serde_json::to_value(response) else {
            warn!("failed to serialize reply payload");
            return;
        };
        let envelope = AgentMessage::new(
            response_type,
            self.node_id.clone(),
            original.from_node_id.clone(),
            self.cluster_id.clone(),
            original.priority,
            Utc::now(),
            payload,
        );
        if let Err(e) = self.post_envelope(&envelope).await {
            warn!(error = %e, "failed to deliver reply envelope");
        }
    }

    /// Mint a HandoffRequest envelope, register a pending entry, POST it,
    /// and wait for the correlated response or the request's own timeout.
    pub async fn send_handoff_request(
        &self,
        target_node_id: impl Into<String>,
        request: HandoffRequest,
    ) -> Result<HandoffResponse, MessagingError> {
        let payload = serde_json::to_value(&request).expect("HandoffRequest always serializes");
        let envelope = AgentMessage::new(
            MessageType::HandoffRequest,
            self.node_id.clone(),
            target_node_id.into(),
            self.cluster_id.clone(),
            request.priority,
            Utc::now(),
            payload,
        );
        let response_msg = self
            .send_and_await(envelope, MessageType::HandoffResponse)
            .await?;
        serde_json::from_value(response_msg.payload).map_err(|_| MessagingError::UnexpectedResponseType)
    }

    pub async fn send_need_more_request(
        &self,
        target_node_id: impl Into<String>,
        request: NeedMoreRequest,
    ) -> Result<HandoffResponse, MessagingError> {
        let payload = serde_json::to_value(&request).expect("NeedMoreRequest always serializes");
        let envelope = AgentMessage::new(
            MessageType::NeedMoreRequest,
            self.node_id.clone(),
            target_node_id.into(),
            self.cluster_id.clone(),
            Priority::Normal,
            Utc::now(),
            payload,
        );
        let response_msg = self
            .send_and_await(envelope, MessageType::NeedMoreResponse)
            .await?;
        serde_json::from_value(response_msg.payload).map_err(|_| MessagingError::UnexpectedResponseType)
    }

    async fn send_and_await(
        &self,
        envelope: AgentMessage,
        expected_response_type: MessageType,
    ) -> Result<AgentMessage, MessagingError> {
        envelope.validate()?;

        let (response_tx, response_rx) = oneshot::channel();
        let message_id = envelope.message_id;
        let expires_at = envelope.expires_at;
        self.pending.write().insert(
            message_id,
            PendingEntry {
                expected_response_type,
                response_tx,
                expires_at,
            },
        );

        if let Err(e) = self.post_envelope(&envelope).await {
            self.pending.write().remove(&message_id);
            return Err(e);
        }

        let remaining = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(0));

        let result = tokio::time::timeout(remaining, response_rx).await;
        self.pending.write().remove(&message_id);

        match result {
            Ok(Ok(response)) => {
                if response.message_type != expected_response_type {
                    return Err(MessagingError::UnexpectedResponseType);
                }
                Ok(response)
            }
            // Channel closed without delivery: sweeper beat us to the expiry.
            Ok(Err(_)) => Err(MessagingError::Timeout),
            Err(_) => Err(MessagingError::Timeout),
        }
    }

    async fn post_envelope(&self, envelope: &AgentMessage) -> Result<(), MessagingError> {
        let _permit = self.outbox_permits.acquire().await.expect("semaphore never closed");
        let url = format!("{}/api/v1/hpc/messages", self.daemon_base_url);
        self.http.post(&url).json(envelope).send().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpc_types::{AgentCapabilities, HealthStatus};

    struct AlwaysHealthy;

    impl AdmissionSource for AlwaysHealthy {
        fn health_status(&self) -> HealthStatus {
            HealthStatus::Healthy
        }
        fn available_capabilities(&self) -> AgentCapabilities {
            AgentCapabilities {
                available_cpu_cores: 16,
                available_memory_gb: 64,
                available_gpus: 0,
                gpu_type: String::new(),
                supported_runtimes: vec![],
            }
        }
        fn running_jobs_count(&self) -> usize {
            0
        }
    }

    fn handler() -> Arc<MessageHandler> {
        MessageHandler::spawn(
            "node-1",
            "cluster-1",
            Client::new(),
            "http://127.0.0.1:1",
            Arc::new(AlwaysHealthy),
            Arc::new(AgentMetrics::default()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn full_inbox_rejects_with_inbox_full() {
        // A cancelled token stops the processor before it drains anything,
        // so the channel genuinely fills.
        let cancel = CancellationToken::new();
        cancel.cancel();
        let h = MessageHandler::spawn(
            "node-1",
            "cluster-1",
            Client::new(),
            "http://127.0.0.1:1",
            Arc::new(AlwaysHealthy),
            Arc::new(AgentMetrics::default()),
            cancel,
        );
        tokio::task::yield_now().await;

        let make_msg = || {
            AgentMessage::new(
                MessageType::HandoffRequest,
                "peer",
                "node-1",
                "cluster-1",
                Priority::Normal,
                Utc::now(),
                serde_json::json!({}),
            )
        };
        for _ in 0..INBOX_CAPACITY {
            h.handle_incoming_message(make_msg()).unwrap();
        }
        assert!(matches!(
            h.handle_incoming_message(make_msg()),
            Err(MessagingError::InboxFull)
        ));
    }

    #[tokio::test]
    async fn unknown_correlation_id_response_is_dropped_without_panic() {
        let h = handler();
        let response = AgentMessage::new(
            MessageType::HandoffResponse,
            "peer",
            "node-1",
            "cluster-1",
            Priority::Normal,
            Utc::now(),
            serde_json::json!({ "request_message_id": Uuid::new_v4().to_string() }),
        );
        h.dispatch_response(response);
        assert!(h.pending.read().is_empty());
    }

    #[tokio::test]
    async fn response_delivered_to_matching_pending_entry() {
        let h = handler();
        let (tx, rx) = oneshot::channel();
        let message_id = Uuid::new_v4();
        h.pending.write().insert(
            message_id,
            PendingEntry {
                expected_response_type: MessageType::HandoffResponse,
                response_tx: tx,
                expires_at: Utc::now() + chrono::Duration::minutes(5),
            },
        );

        let response = AgentMessage::new(
            MessageType::HandoffResponse,
            "peer",
            "node-1",
            "cluster-1",
            Priority::Normal,
            Utc::now(),
            serde_json::json!({ "request_message_id": message_id.to_string() }),
        );
        h.dispatch_response(response);

        let delivered = rx.await.unwrap();
        assert_eq!(delivered.message_type, MessageType::HandoffResponse);
        assert!(h.pending.read().is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let h = handler();
        let (fresh_tx, _fresh_rx) = oneshot::channel();
        let (stale_tx, mut stale_rx) = oneshot::channel();
        let fresh_id = Uuid::new_v4();
        let stale_id = Uuid::new_v4();
        h.pending.write().insert(
            fresh_id,
            PendingEntry {
                expected_response_type: MessageType::HandoffResponse,
                response_tx: fresh_tx,
                expires_at: Utc::now() + chrono::Duration::minutes(5),
            },
        );
        h.pending.write().insert(
            stale_id,
            PendingEntry {
                expected_response_type: MessageType::HandoffResponse,
                response_tx: stale_tx,
                expires_at: Utc::now() - chrono::Duration::minutes(1),
            },
        );

        h.sweep_expired();

        assert!(h.pending.read().contains_key(&fresh_id));
        assert!(!h.pending.read().contains_key(&stale_id));
        assert!(stale_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_handoff_request_records_accept_and_reject_metrics() {
        use hpc_types::{JobDescriptor, RequiredCapabilities};

        let h = handler();
        let small_request = HandoffRequest {
            required_capabilities: RequiredCapabilities {
                min_memory_gb: 8,
                min_cpu_cores: 2,
                min_gpus: 0,
                gpu_types: vec![],
                supported_runtimes: vec![],
                max_task_duration_seconds: 3600,
            },
            priority: Priority::Normal,
            job_descriptor: JobDescriptor {
                job_id: "j1".into(),
                workload_id: "w1".into(),
                runtime: "singularity".into(),
                image_or_command: "echo hi".into(),
            },
            requested_duration_seconds: 60,
        };
        let accepted_msg = AgentMessage::new(
            MessageType::HandoffRequest,
            "peer",
            "node-1",
            "cluster-1",
            Priority::Normal,
            Utc::now(),
            serde_json::to_value(&small_request).unwrap(),
        );
        h.dispatch_handoff_request(accepted_msg).await;

        // Malformed payload: fails to parse as a HandoffRequest, rejected
        // as incompatible without ever consulting the admission source.
        let rejected_msg = AgentMessage::new(
            MessageType::HandoffRequest,
            "peer",
            "node-1",
            "cluster-1",
            Priority::Normal,
            Utc::now(),
            serde_json::json!({}),
        );
        h.dispatch_handoff_request(rejected_msg).await;

        assert_eq!(h.metrics.handoffs_accepted(), 1);
        assert_eq!(h.metrics.handoffs_rejected(), 1);
    }
}
