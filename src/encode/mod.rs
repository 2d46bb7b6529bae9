//! Collector wire encoding for transaction traces

mod trace;

pub use trace::{HarvestTrace, TraceData};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
