//! Cross-transaction trace reservoir and the periodic harvest that drains it

mod reservoir;
mod worker;

pub use reservoir::HarvestTraces;
pub use worker::{HarvestError, HarvestWorker, LogSink, PayloadSink, SinkError};
