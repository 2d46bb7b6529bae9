use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::Duration;

use super::stack::StackTrace;
use crate::sanitize::QueryParameters;

/// A completed segment as retained in the trace
#[derive(Debug, Clone)]
pub struct Node {
    /// Start-order identity, shared with the ancestry table
    pub(crate) stamp: u32,
    /// Offset from transaction start
    pub start: Duration,
    /// Offset from transaction start, never before `start`
    pub end: Duration,
    /// Metric name, e.g. `Custom/render`
    pub name: String,
    pub params: Option<NodeParams>,
}

impl Node {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    pub fn start_ms(&self) -> u64 {
        self.start.as_millis() as u64
    }

    pub fn end_ms(&self) -> u64 {
        self.end.as_millis() as u64
    }
}

/// Diagnostics attached to a node
#[derive(Debug, Clone, Default)]
pub struct NodeParams {
    /// Present only for segments at or above the stack trace threshold
    pub stack_trace: Option<StackTrace>,
    pub segment: SegmentParams,
}

impl NodeParams {
    /// Params worth attaching, or `None` when there is nothing to report
    pub(crate) fn build(stack_trace: Option<StackTrace>, segment: SegmentParams) -> Option<Self> {
        if stack_trace.is_none() && !segment.has_fields() {
            return None;
        }
        Some(Self {
            stack_trace,
            segment,
        })
    }

    /// Sanitized external URL, if any
    pub fn uri(&self) -> Option<&str> {
        match &self.segment {
            SegmentParams::External { uri } => uri.as_deref(),
            _ => None,
        }
    }

    pub fn datastore(&self) -> Option<&DatastoreParams> {
        match &self.segment {
            SegmentParams::Datastore(ds) => Some(ds),
            _ => None,
        }
    }
}

/// Category-specific part of a node's params
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SegmentParams {
    #[default]
    Basic,
    Datastore(DatastoreParams),
    External {
        /// `scheme://host/path`, query string removed
        uri: Option<String>,
    },
}

impl SegmentParams {
    fn has_fields(&self) -> bool {
        match self {
            SegmentParams::Basic => false,
            SegmentParams::Datastore(ds) => ds.has_fields(),
            SegmentParams::External { uri } => uri.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatastoreParams {
    pub product: String,
    pub operation: String,
    pub collection: Option<String>,
    pub host: Option<String>,
    pub port_path_or_id: Option<String>,
    pub database: Option<String>,
    /// Obfuscated statement text
    pub query: Option<String>,
    pub query_parameters: Option<QueryParameters>,
}

impl DatastoreParams {
    fn has_fields(&self) -> bool {
        self.host.is_some()
            || self.port_path_or_id.is_some()
            || self.database.is_some()
            || self.query.is_some()
            || self.query_parameters.is_some()
    }
}

impl Serialize for NodeParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(stack) = &self.stack_trace {
            map.serialize_entry("backtrace", stack)?;
        }
        match &self.segment {
            SegmentParams::Basic => {}
            SegmentParams::External { uri } => {
                if let Some(uri) = uri {
                    map.serialize_entry("uri", uri)?;
                }
            }
            SegmentParams::Datastore(ds) => {
                if let Some(database) = &ds.database {
                    map.serialize_entry("database_name", database)?;
                }
                if let Some(host) = &ds.host {
                    map.serialize_entry("host", host)?;
                }
                if let Some(port) = &ds.port_path_or_id {
                    map.serialize_entry("port_path_or_id", port)?;
                }
                if let Some(query) = &ds.query {
                    map.serialize_entry("query", query)?;
                }
                if let Some(params) = &ds.query_parameters {
                    map.serialize_entry("query_parameters", params)?;
                }
            }
        }
        map.end()
    }
}
