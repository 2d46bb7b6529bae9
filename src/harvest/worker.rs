use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time;

use super::HarvestTraces;
use crate::config::HarvestConfig;
use crate::encode::EncodeError;

/// Destination for encoded harvest payloads
pub trait PayloadSink: Send + Sync {
    fn send(&self, payload: &[u8]) -> Result<(), SinkError>;
}

/// Sink that writes each payload to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl PayloadSink for LogSink {
    fn send(&self, payload: &[u8]) -> Result<(), SinkError> {
        let text = std::str::from_utf8(payload).map_err(|e| SinkError::Rejected(e.to_string()))?;
        tracing::info!(bytes = payload.len(), "Transaction trace payload: {}", text);
        Ok(())
    }
}

/// Periodically drains a [`HarvestTraces`] reservoir into a sink
pub struct HarvestWorker {
    traces: Arc<HarvestTraces>,
    sink: Arc<dyn PayloadSink>,
    config: HarvestConfig,
    running: Arc<AtomicBool>,
}

impl HarvestWorker {
    pub fn new(
        traces: Arc<HarvestTraces>,
        sink: Arc<dyn PayloadSink>,
        config: HarvestConfig,
    ) -> Self {
        Self {
            traces,
            sink,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker. The first harvest happens one period
    /// after start.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                agent_run_id = %self.config.agent_run_id,
                "Harvest worker started with period {:?}",
                self.config.period
            );

            let period = self.config.period;
            let mut interval = time::interval_at(time::Instant::now() + period, period);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = self.harvest_once() {
                    tracing::warn!("Transaction trace harvest failed: {}", e);
                }
            }

            tracing::info!("Harvest worker stopped");
        })
    }

    /// Harvest now. Returns whether a payload was sent.
    pub fn harvest_once(&self) -> Result<bool, HarvestError> {
        let Some(payload) = self.traces.harvest(&self.config.agent_run_id)? else {
            tracing::debug!("No transaction trace to harvest");
            return Ok(false);
        };

        self.sink.send(&payload)?;
        tracing::debug!(bytes = payload.len(), "Transaction trace harvested");
        Ok(true)
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Payload rejected: {0}")]
    Rejected(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}
