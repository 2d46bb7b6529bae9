//! Segment capture for a single transaction
//!
//! A [`Tracer`] lives for one transaction. Application code brackets units of
//! work with [`Tracer::start_segment`] and one of the `end_*` calls; each
//! completed segment becomes a [`Node`] that is filtered by duration,
//! optionally enriched with a stack trace, and offered to a bounded
//! [`NodeStore`] that keeps the slowest nodes.
//!
//! ```
//! use chrono::Utc;
//! use txntrace::trace::{DatastoreSegment, Tracer};
//! use txntrace::TraceConfig;
//!
//! let start = Utc::now();
//! let mut tracer = Tracer::new(TraceConfig::default(), start);
//!
//! let token = tracer.start_segment(start);
//! tracer.end_datastore_segment(
//!     token,
//!     start + chrono::Duration::milliseconds(40),
//!     DatastoreSegment::new("MySQL", "SELECT").with_collection("users"),
//! );
//!
//! let trace = tracer.finish();
//! assert_eq!(trace.nodes()[0].name, "Datastore/statement/MySQL/users/SELECT");
//! ```

mod node;
mod segments;
mod stack;
mod store;
mod tracer;
mod txn;

pub use node::{DatastoreParams, Node, NodeParams, SegmentParams};
pub use segments::DatastoreSegment;
pub use stack::{StackTrace, MAX_STACK_FRAMES};
pub use store::{NodeStore, Retention};
pub use tracer::{SegmentStart, Tracer};
pub use txn::{TraceNode, TxnTrace, MAX_TREE_DEPTH};

pub(crate) use txn::EmptyObject;
