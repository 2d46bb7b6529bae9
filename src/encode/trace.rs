use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

use super::EncodeError;
use crate::attributes::{AttributeValue, Attributes, Destination, DestinationAttributes};
use crate::trace::{EmptyObject, TraceNode, TxnTrace};

/// Snapshot of a finished transaction, ready for the reservoir
#[derive(Debug, Clone)]
pub struct HarvestTrace {
    /// Wall-clock transaction start
    pub start: DateTime<Utc>,
    pub duration: Duration,
    /// e.g. `WebTransaction/Go/hello`
    pub metric_name: String,
    /// Request URL without query string
    pub clean_url: String,
    pub trace: TxnTrace,
    /// Attributes already filtered for the trace destination
    pub attributes: DestinationAttributes,
}

impl HarvestTrace {
    pub fn new(
        start: DateTime<Utc>,
        duration: Duration,
        metric_name: impl Into<String>,
        clean_url: impl Into<String>,
        trace: TxnTrace,
        attributes: &Attributes,
    ) -> Self {
        Self {
            start,
            duration,
            metric_name: metric_name.into(),
            clean_url: clean_url.into(),
            trace,
            attributes: attributes.for_destination(Destination::TXN_TRACE),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Absolute start in microseconds since the epoch
    pub fn start_micros(&self) -> i64 {
        self.start.timestamp_micros()
    }

    /// Borrowing view that serializes as the trace array
    pub fn trace_data(&self) -> TraceData<'_> {
        TraceData { trace: self }
    }

    /// `[0,{},{},ROOT,ATTRS]` as compact JSON
    pub fn trace_json(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(&self.trace_data())?)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceAttributes<'a> {
    agent_attributes: &'a BTreeMap<String, AttributeValue>,
    user_attributes: &'a BTreeMap<String, AttributeValue>,
    intrinsics: EmptyObject,
}

/// Serializes as
/// `[0,{},{},[0,D,"ROOT",{},[[0,D,metricName,{},children]]],ATTRS]`
pub struct TraceData<'a> {
    trace: &'a HarvestTrace,
}

impl Serialize for TraceData<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ht = self.trace;
        let total = ht.duration_ms();
        let children: Vec<TraceNode<'_>> = ht.trace.tree();

        let txn_node = (0u64, total, ht.metric_name.as_str(), EmptyObject, &children);
        let root = (0u64, total, "ROOT", EmptyObject, [txn_node]);
        let attrs = TraceAttributes {
            agent_attributes: &ht.attributes.agent,
            user_attributes: &ht.attributes.user,
            intrinsics: EmptyObject,
        };

        (0u64, EmptyObject, EmptyObject, root, attrs).serialize(serializer)
    }
}
