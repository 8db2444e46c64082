//! Per-workload usage sampling: tracks metering state per workload and
//! drives a periodic sampling task against a pluggable metering driver.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use hpc_crypto::KeyService;
use hpc_platform::AgentMetrics;
use hpc_types::{UsageMetrics, UsageRecord, UsageRecordType};

use crate::driver::MeteringDriver;
use crate::error::MeteringError;
use crate::state::MeteringState;

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

pub struct UsageMeter {
    provider_id: String,
    driver: Arc<dyn MeteringDriver>,
    key_service: Arc<KeyService>,
    registry: RwLock<HashMap<String, MeteringState>>,
    timers: RwLock<HashMap<String, CancellationToken>>,
    outbound_tx: mpsc::Sender<UsageRecord>,
    outbound_rx: Mutex<Option<mpsc::Receiver<UsageRecord>>>,
    sampling_interval: Duration,
    metrics: Arc<AgentMetrics>,
}

impl UsageMeter {
    pub fn new(
        provider_id: impl Into<String>,
        driver: Arc<dyn MeteringDriver>,
        key_service: Arc<KeyService>,
        sampling_interval: Duration,
        metrics: Arc<AgentMetrics>,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        Arc::new(Self {
            provider_id: provider_id.into(),
            driver,
            key_service,
            registry: RwLock::new(HashMap::new()),
            timers: RwLock::new(HashMap::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            sampling_interval,
            metrics,
        })
    }

    /// Takes ownership of the outbound channel's receiver. Returns `None`
    /// if already taken — there is exactly one consumer.
    pub fn take_outbound_receiver(&self) -> Option<mpsc::Receiver<UsageRecord>> {
        self.outbound_rx.lock().take()
    }

    pub fn start_metering(
        self: &Arc<Self>,
        workload_id: impl Into<String>,
        deployment_id: impl Into<String>,
        lease_id: impl Into<String>,
        pricing_inputs: serde_json::Value,
    ) -> Result<(), MeteringError> {
        let workload_id = workload_id.into();
        {
            let mut registry = self.registry.write();
            if registry.contains_key(&workload_id) {
                return Err(MeteringError::AlreadyMetered(workload_id));
            }
            registry.insert(
                workload_id.clone(),
                MeteringState::new(deployment_id.into(), lease_id.into(), pricing_inputs, Utc::now()),
            );
        }

        let token = CancellationToken::new();
        self.timers.write().insert(workload_id.clone(), token.clone());
        self.clone().spawn_sampling_timer(workload_id, token);
        Ok(())
    }

    fn spawn_sampling_timer(self: Arc<Self>, workload_id: String, cancel: CancellationToken) {
        let interval_duration = self.sampling_interval;
        tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sample_and_emit(&workload_id, UsageRecordType::Periodic).await {
                            warn!(workload_id = %workload_id, error = %e, "periodic usage sample failed, retrying next tick");
                        }
                    }
                }
            }
        });
    }

    pub async fn force_collect(&self, workload_id: &str) -> Result<UsageRecord, MeteringError> {
        self.sample_and_emit(workload_id, UsageRecordType::Periodic).await
    }

    /// Final sample closes the sequence; the workload is then removed from
    /// the registry and its sampling timer cancelled.
    pub async fn stop_metering(&self, workload_id: &str) -> Result<UsageRecord, MeteringError> {
        let record = self.sample_and_emit(workload_id, UsageRecordType::Final).await?;
        self.registry.write().remove(workload_id);
        if let Some(token) = self.timers.write().remove(workload_id) {
            token.cancel();
        }
        Ok(record)
    }

    async fn sample_and_emit(&self, workload_id: &str, record_type: UsageRecordType) -> Result<UsageRecord, MeteringError> {
        let (deployment_id, lease_id, previous_cumulative, sequence_number, period_start, previous_record_id, closed) = {
            let registry = self.registry.read();
            let state = registry.get(workload_id).ok_or_else(|| MeteringError::NotFound(workload_id.to_string()))?;
            (
                state.deployment_id.clone(),
                state.lease_id.clone(),
                state.last_cumulative_metrics,
                state.last_sequence_number + 1,
                state.last_period_end,
                state.last_record_id,
                state.closed,
            )
        };

        if closed {
            return Err(MeteringError::NotFound(workload_id.to_string()));
        }

        let current = self.driver.current_metrics(workload_id).await?;

        if UsageMetrics::any_component_regressed(&current, &previous_cumulative) {
            warn!(workload_id, "usage metrics regressed, clamping delta to zero");
        }
        let delta = UsageMetrics::saturating_delta(&current, &previous_cumulative);

        let now = Utc::now();
        let mut record = UsageRecord {
            record_id: Uuid::new_v4(),
            workload_id: workload_id.to_string(),
            deployment_id,
            lease_id,
            provider_id: self.provider_id.clone(),
            record_type,
            period_start,
            period_end: now,
            metrics: delta,
            cumulative_metrics: current,
            delta_metrics: delta,
            signature: None,
            content_hash: None,
            sequence_number,
            previous_record_id,
        };

        let content_hash = record.compute_content_hash();
        record.content_hash = Some(content_hash.clone());
        match self.key_service.sign(content_hash.as_bytes()) {
            Ok(sig) => {
                record.signature = Some(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig));
            }
            Err(e) => warn!(workload_id, error = %e, "failed to sign usage record"),
        }

        {
            let mut registry = self.registry.write();
            if let Some(state) = registry.get_mut(workload_id) {
                state.last_cumulative_metrics = current;
                state.last_sequence_number = sequence_number;
                state.last_period_end = now;
                state.last_record_id = Some(record.record_id);
                if record_type == UsageRecordType::Final {
                    state.closed = true;
                    state.active = false;
                }
            }
        }

        if self.outbound_tx.try_send(record.clone()).is_err() {
            warn!(workload_id, "outbound usage channel full, record retained only for driver submission");
        }

        if let Err(e) = self.driver.submit_usage_record(&record).await {
            warn!(workload_id, error = %e, "chain recorder submission failed, record retained for redelivery");
        }

        self.metrics.record_usage_record_emitted();
        info!(workload_id, sequence_number, ?record_type, "usage record emitted");
        Ok(record)
    }
}
