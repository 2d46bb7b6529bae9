use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::encode::{EncodeError, HarvestTrace, TraceData};

/// One trace entry in the harvest payload:
/// `[startMicros, durationMs, metricName, cleanURL, trace, "", null, false, null, ""]`
type PayloadEntry<'a> = (
    i64,
    u64,
    &'a str,
    &'a str,
    TraceData<'a>,
    &'static str,
    (),
    bool,
    (),
    &'static str,
);

fn payload_entry(trace: &HarvestTrace) -> PayloadEntry<'_> {
    (
        trace.start_micros(),
        trace.duration_ms(),
        trace.metric_name.as_str(),
        trace.clean_url.as_str(),
        trace.trace_data(),
        "",
        (),
        false,
        (),
        "",
    )
}

/// `[agentRunID, [entry]]` as compact JSON
fn encode_payload(agent_run_id: &str, trace: &HarvestTrace) -> Result<Vec<u8>, EncodeError> {
    let payload = (agent_run_id, [payload_entry(trace)]);
    Ok(serde_json::to_vec(&payload)?)
}

/// Holds the single slowest transaction trace seen since the last harvest.
///
/// Shared between request-handling threads that call [`witness`] and the
/// harvest loop that drains it.
///
/// [`witness`]: HarvestTraces::witness
#[derive(Debug, Default)]
pub struct HarvestTraces {
    slot: Mutex<Option<HarvestTrace>>,
}

impl HarvestTraces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a finished trace. It is kept only if it is strictly longer than
    /// the one held; returns whether it was kept.
    pub fn witness(&self, trace: HarvestTrace) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(held) if trace.duration <= held.duration => false,
            _ => {
                *slot = Some(trace);
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Duration of the held trace in milliseconds
    pub fn held_duration_ms(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(HarvestTrace::duration_ms)
    }

    pub fn reset(&self) {
        *self.slot.lock() = None;
    }

    /// Remove and return the held trace
    pub fn take(&self) -> Option<HarvestTrace> {
        self.slot.lock().take()
    }

    /// Encode the held trace without clearing it. `Ok(None)` when nothing
    /// is held.
    pub fn data(
        &self,
        agent_run_id: &str,
        _harvest_start: DateTime<Utc>,
    ) -> Result<Option<Vec<u8>>, EncodeError> {
        let slot = self.slot.lock();
        slot.as_ref()
            .map(|trace| encode_payload(agent_run_id, trace))
            .transpose()
    }

    /// Drain the reservoir and encode what it held. Encoding happens after
    /// the lock is released so witnesses are not blocked on serialization.
    pub fn harvest(&self, agent_run_id: &str) -> Result<Option<Vec<u8>>, EncodeError> {
        let Some(trace) = self.take() else {
            return Ok(None);
        };
        encode_payload(agent_run_id, &trace).map(Some)
    }
}
