//! Txntrace: transaction trace capture for instrumentation agents
//!
//! Records the timed segments of a single transaction (custom work,
//! datastore calls, calls to external services), keeps a bounded set of the
//! slowest ones, and encodes them in the collector's nested-array trace
//! format. Across transactions, a reservoir keeps the single slowest trace
//! per harvest period.
//!
//! # Features
//!
//! - **Segment Tracer**: start/end tokens with nesting and abandonment
//! - **Top-K Retention**: slowest `max_nodes` segments kept in O(log K)
//! - **Enrichment**: stack traces and query parameters above a threshold
//! - **Sanitization**: SQL literals obfuscated, URL query strings dropped
//! - **Harvest**: reservoir of the slowest trace, periodic payload encoding
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use std::time::Duration;
//! use txntrace::attributes::Attributes;
//! use txntrace::trace::Tracer;
//! use txntrace::{HarvestTrace, HarvestTraces, TraceConfig};
//!
//! let start = Utc::now();
//! let mut tracer = Tracer::new(TraceConfig::default(), start);
//!
//! let token = tracer.start_segment(start);
//! tracer.end_basic_segment(token, start + chrono::Duration::milliseconds(30), "render");
//!
//! let traces = HarvestTraces::new();
//! traces.witness(HarvestTrace::new(
//!     start,
//!     Duration::from_millis(45),
//!     "WebTransaction/Go/hello",
//!     "/hello",
//!     tracer.finish(),
//!     &Attributes::new(),
//! ));
//!
//! let payload = traces.harvest("12345").unwrap().unwrap();
//! assert!(payload.starts_with(b"[\"12345\","));
//! ```

pub mod attributes;
pub mod config;
pub mod encode;
pub mod harvest;
pub mod sanitize;
pub mod trace;

pub use config::{HarvestConfig, TraceConfig};
pub use encode::{EncodeError, HarvestTrace};
pub use harvest::HarvestTraces;
pub use trace::{SegmentStart, Tracer, TxnTrace};
