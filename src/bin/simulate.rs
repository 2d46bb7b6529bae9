//! Transaction trace simulator
//!
//! Run with: cargo run --bin simulate [transactions] [seed]
//!
//! Generates synthetic web transactions with nested custom, datastore and
//! external segments, feeds them through the tracer and the harvest
//! reservoir, and logs the harvested payload.
//!
//! Environment variables:
//! - TXNTRACE_ENABLED, TXNTRACE_SEGMENT_THRESHOLD_MS,
//!   TXNTRACE_STACK_TRACE_THRESHOLD_MS, TXNTRACE_MAX_NODES: trace capture
//! - TXNTRACE_AGENT_RUN_ID: run identifier placed in the payload
//! - RUST_LOG: Log level (default: txntrace=info)

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use txntrace::attributes::{Attributes, Destination};
use txntrace::harvest::{HarvestWorker, LogSink};
use txntrace::trace::{DatastoreSegment, Tracer};
use txntrace::{HarvestConfig, HarvestTrace, HarvestTraces, TraceConfig};
use url::Url;

const ROUTES: &[&str] = &["/home", "/products", "/checkout", "/search", "/account"];
const TABLES: &[&str] = &["users", "orders", "products", "sessions"];
const OPERATIONS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE"];
const SERVICES: &[&str] = &[
    "http://payments.internal/charge?token=abc",
    "https://api.example.com/v1/rates",
    "http://inventory:8081/stock/42",
];
const HANDLERS: &[&str] = &["render", "authorize", "serialize", "validate"];

/// Simulated clock that only moves forward
struct Clock {
    now: DateTime<Utc>,
}

impl Clock {
    fn advance(&mut self, rng: &mut StdRng, max_ms: i64) -> DateTime<Utc> {
        self.now += Duration::milliseconds(rng.gen_range(0..=max_ms));
        self.now
    }
}

fn datastore_segment(rng: &mut StdRng) -> DatastoreSegment {
    let table = TABLES[rng.gen_range(0..TABLES.len())];
    let op = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
    let mut segment = DatastoreSegment::new("Postgres", op);

    // Leave some segments bare to exercise the synthesized statement
    if rng.gen_bool(0.8) {
        segment = segment
            .with_collection(table)
            .with_query(format!(
                "{} * FROM {} WHERE id = {} AND name = 'user-{}'",
                op,
                table,
                rng.gen_range(1..10_000),
                rng.gen_range(1..100)
            ))
            .with_query_parameters(vec![("id", serde_json::json!(rng.gen_range(1..10_000)))])
            .with_host("db-1")
            .with_port_path_or_id("5432")
            .with_database("shop");
    }
    segment
}

fn simulate_transaction(
    config: &TraceConfig,
    rng: &mut StdRng,
    start: DateTime<Utc>,
) -> HarvestTrace {
    let route = ROUTES[rng.gen_range(0..ROUTES.len())];
    let mut clock = Clock { now: start };
    let mut tracer = Tracer::new(config.clone(), start);

    let segments = rng.gen_range(1..40);
    for _ in 0..segments {
        let outer = tracer.start_segment(clock.advance(rng, 5));
        match rng.gen_range(0..3) {
            0 => {
                let token = tracer.start_segment(clock.advance(rng, 2));
                let end = clock.advance(rng, 600);
                tracer.end_datastore_segment(token, end, datastore_segment(rng));
            }
            1 => {
                let token = tracer.start_segment(clock.advance(rng, 2));
                let end = clock.advance(rng, 900);
                let url = Url::parse(SERVICES[rng.gen_range(0..SERVICES.len())]).ok();
                tracer.end_external_segment(token, end, url.as_ref());
            }
            _ => {}
        }
        let handler = HANDLERS[rng.gen_range(0..HANDLERS.len())];
        let end = clock.advance(rng, 50);
        tracer.end_basic_segment(outer, end, handler);
    }

    let end = clock.advance(rng, 20);
    let duration = (end - start).to_std().unwrap_or_default();

    let mut attrs = Attributes::new();
    attrs.add_agent_attribute("request.method", "GET", Destination::ALL);
    attrs.add_agent_attribute("request.uri", route, Destination::TXN_TRACE);
    if let Err(e) = attrs.add_user_attribute("segments", segments as i64, Destination::ALL) {
        tracing::warn!("Dropping user attribute: {}", e);
    }

    HarvestTrace::new(
        start,
        duration,
        format!("WebTransaction/Go{}", route),
        route,
        tracer.finish(),
        &attrs,
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "txntrace=info,simulate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let transactions: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1000);
    let seed: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(12345);

    let trace_config = TraceConfig::from_env();
    let mut harvest_config = HarvestConfig::from_env();
    if harvest_config.agent_run_id.is_empty() {
        harvest_config.agent_run_id = "simulated".to_string();
    }

    tracing::info!(
        transactions,
        seed,
        max_nodes = trace_config.max_nodes,
        "Simulating transactions with {:?}",
        trace_config
    );

    let traces = Arc::new(HarvestTraces::new());
    let worker = HarvestWorker::new(traces.clone(), Arc::new(LogSink), harvest_config);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut start = Utc::now();
    let begin = Instant::now();
    let mut kept = 0usize;

    for _ in 0..transactions {
        start += Duration::milliseconds(rng.gen_range(1..100));
        if traces.witness(simulate_transaction(&trace_config, &mut rng, start)) {
            kept += 1;
        }
    }

    tracing::info!(
        elapsed = ?begin.elapsed(),
        replacements = kept,
        slowest_ms = ?traces.held_duration_ms(),
        "Simulation finished"
    );

    if !worker.harvest_once()? {
        tracing::info!("No transaction trace recorded");
    }
    Ok(())
}
