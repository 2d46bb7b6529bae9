use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

use super::segments::{custom_metric_name, external_metric_name, external_params, DatastoreSegment};
use super::txn::{SegmentEnd, TxnTrace, ROOT_STAMP};
use crate::config::TraceConfig;

static NEXT_TRACER_ID: AtomicU64 = AtomicU64::new(1);

/// Token returned by [`Tracer::start_segment`], consumed by one `end_*` call.
///
/// Not `Clone`: a token can be ended at most once.
#[must_use = "a segment is only recorded when its token is ended"]
#[derive(Debug)]
pub struct SegmentStart {
    /// 0 for the sentinel issued by a disabled tracer
    tracer: u64,
    stamp: u32,
    /// Stack depth at start; the segment's frame sits at this index
    depth: usize,
    start: Duration,
}

impl SegmentStart {
    fn sentinel() -> Self {
        Self {
            tracer: 0,
            stamp: 0,
            depth: 0,
            start: Duration::ZERO,
        }
    }

    /// Offset from transaction start
    pub fn start_offset(&self) -> Duration {
        self.start
    }

    pub fn is_sentinel(&self) -> bool {
        self.tracer == 0
    }
}

/// Per-transaction segment tracker.
///
/// Owned by the code executing the transaction; every segment call takes
/// `&mut self`, so one tracer is never shared between threads.
#[derive(Debug)]
pub struct Tracer {
    id: u64,
    start: DateTime<Utc>,
    /// Stamps of currently open segments, innermost last
    stack: Vec<u32>,
    trace: TxnTrace,
}

impl Tracer {
    pub fn new(config: TraceConfig, start: DateTime<Utc>) -> Self {
        Self {
            id: NEXT_TRACER_ID.fetch_add(1, Ordering::Relaxed),
            start,
            stack: Vec::new(),
            trace: TxnTrace::new(config),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn is_enabled(&self) -> bool {
        self.trace.config().enabled
    }

    /// Number of segments started but not yet ended
    pub fn open_segments(&self) -> usize {
        self.stack.len()
    }

    pub fn trace(&self) -> &TxnTrace {
        &self.trace
    }

    /// Finish the transaction, keeping only the retained nodes
    pub fn finish(self) -> TxnTrace {
        self.trace
    }

    fn offset(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn start_segment(&mut self, now: DateTime<Utc>) -> SegmentStart {
        if !self.is_enabled() {
            return SegmentStart::sentinel();
        }

        let parent = self.stack.last().copied().unwrap_or(ROOT_STAMP);
        let Some(stamp) = self.trace.register_start(parent) else {
            return SegmentStart::sentinel();
        };
        let depth = self.stack.len();
        self.stack.push(stamp);

        SegmentStart {
            tracer: self.id,
            stamp,
            depth,
            start: self.offset(now),
        }
    }

    /// Validate the token and pop its frame along with any frames opened
    /// after it. Returns `None` when the end should be ignored.
    fn end_segment(&mut self, token: SegmentStart, now: DateTime<Utc>) -> Option<SegmentEnd> {
        if !self.is_enabled() || token.is_sentinel() {
            return None;
        }
        if token.tracer != self.id {
            tracing::debug!(
                tracer = self.id,
                token_tracer = token.tracer,
                "Ignoring segment started on another tracer"
            );
            return None;
        }
        if self.stack.get(token.depth) != Some(&token.stamp) {
            tracing::debug!(
                stamp = token.stamp,
                depth = token.depth,
                "Ignoring segment that already ended or was abandoned"
            );
            return None;
        }

        let abandoned = self.stack.len() - token.depth - 1;
        if abandoned > 0 {
            tracing::debug!(abandoned, "Segment ended with inner segments still open");
        }
        self.stack.truncate(token.depth);

        let end = self.offset(now).max(token.start);
        Some(SegmentEnd {
            stamp: token.stamp,
            start: token.start,
            end,
        })
    }

    /// Validate and filter; `None` when nothing should be recorded
    fn accepted_end(&mut self, token: SegmentStart, now: DateTime<Utc>) -> Option<SegmentEnd> {
        let end = self.end_segment(token, now)?;
        if self.trace.considers(end.duration()) {
            Some(end)
        } else {
            None
        }
    }

    /// End a custom segment, recorded as `Custom/<label>`
    pub fn end_basic_segment(&mut self, token: SegmentStart, now: DateTime<Utc>, label: &str) {
        if let Some(end) = self.accepted_end(token, now) {
            self.trace
                .witness_node(end, custom_metric_name(label), Default::default());
        }
    }

    pub fn end_datastore_segment(
        &mut self,
        token: SegmentStart,
        now: DateTime<Utc>,
        segment: DatastoreSegment,
    ) {
        if let Some(end) = self.accepted_end(token, now) {
            let name = segment.metric_name();
            let full = self.trace.full_diagnostics(end.duration());
            self.trace.witness_node(end, name, segment.into_params(full));
        }
    }

    /// End a call to an external service. The URL's query string is never
    /// stored.
    pub fn end_external_segment(
        &mut self,
        token: SegmentStart,
        now: DateTime<Utc>,
        url: Option<&Url>,
    ) {
        if let Some(end) = self.accepted_end(token, now) {
            self.trace
                .witness_node(end, external_metric_name(url), external_params(url));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::stack::is_agent_symbol;
    use crate::trace::SegmentParams;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 11, 28, 1, 1, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        start() + chrono::Duration::seconds(secs)
    }

    fn config() -> TraceConfig {
        TraceConfig::default()
            .with_segment_threshold(Duration::ZERO)
            .with_stack_trace_threshold(Duration::from_secs(3600))
            .with_max_nodes(0)
    }

    fn names(tracer: &Tracer) -> Vec<String> {
        tracer.trace().nodes().iter().map(|n| n.name.clone()).collect()
    }

    #[test]
    fn test_disabled_tracer_is_noop() {
        let mut tracer = Tracer::new(config().with_enabled(false), start());
        let token = tracer.start_segment(at(1));
        assert!(token.is_sentinel());
        assert_eq!(tracer.open_segments(), 0);

        tracer.end_basic_segment(token, at(2), "t1");
        assert!(tracer.trace().is_empty());
    }

    #[test]
    fn test_foreign_token_ignored() {
        let mut a = Tracer::new(config(), start());
        let mut b = Tracer::new(config(), start());

        let token = a.start_segment(at(1));
        let _other = b.start_segment(at(1));
        b.end_basic_segment(token, at(2), "foreign");

        assert!(b.trace().is_empty());
        assert_eq!(b.open_segments(), 1);
        assert_eq!(a.open_segments(), 1);
    }

    #[test]
    fn test_ending_outer_abandons_inner() {
        let mut tracer = Tracer::new(config(), start());
        let outer = tracer.start_segment(at(1));
        let inner = tracer.start_segment(at(2));

        tracer.end_basic_segment(outer, at(5), "outer");
        assert_eq!(tracer.open_segments(), 0);

        // The inner frame was popped, so its end is ignored
        tracer.end_basic_segment(inner, at(6), "inner");
        assert_eq!(names(&tracer), vec!["Custom/outer"]);
    }

    #[test]
    fn test_negative_duration_clamped() {
        let mut tracer = Tracer::new(config(), start());
        let token = tracer.start_segment(at(5));
        tracer.end_basic_segment(token, at(3), "backwards");

        let nodes = tracer.trace().nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].start_ms(), 5000);
        assert_eq!(nodes[0].end_ms(), 5000);
    }

    #[test]
    fn test_start_before_transaction_clamped() {
        let mut tracer = Tracer::new(config(), start());
        let token = tracer.start_segment(at(-3));
        assert_eq!(token.start_offset(), Duration::ZERO);
        tracer.end_basic_segment(token, at(1), "early");
        assert_eq!(tracer.trace().nodes()[0].end_ms(), 1000);
    }

    #[test]
    fn test_segment_threshold_independent_of_max_nodes() {
        for max_nodes in [0, 1, 100] {
            let mut tracer = Tracer::new(
                config()
                    .with_segment_threshold(Duration::from_secs(2))
                    .with_max_nodes(max_nodes),
                start(),
            );
            let token = tracer.start_segment(at(0));
            tracer.end_basic_segment(token, at(1), "short");
            assert!(tracer.trace().is_empty(), "max_nodes = {}", max_nodes);
        }
    }

    #[test]
    fn test_stack_trace_threshold() {
        let mut tracer = Tracer::new(
            config()
                .with_stack_trace_threshold(Duration::from_secs(2))
                .with_max_nodes(5),
            start(),
        );

        // below stack trace threshold
        let t1 = tracer.start_segment(at(1));
        tracer.end_basic_segment(t1, at(2), "t1");

        // at the threshold, no URL
        let t2 = tracer.start_segment(at(2));
        tracer.end_datastore_segment(
            t2,
            at(4),
            DatastoreSegment::new("MySQL", "SELECT").with_collection("my_table"),
        );

        // above the threshold with a URL
        let t3 = tracer.start_segment(at(4));
        let url = Url::parse("http://example.com/zip/zap?secret=shhh").unwrap();
        tracer.end_external_segment(t3, at(7), Some(&url));

        let nodes = tracer.trace().nodes();
        assert!(nodes[0].params.is_none());

        let p = nodes[1].params.as_ref().unwrap();
        assert!(p.stack_trace.is_some());
        assert_eq!(p.uri(), None);

        let p = nodes[2].params.as_ref().unwrap();
        assert!(p.stack_trace.is_some());
        assert_eq!(p.uri(), Some("http://example.com/zip/zap"));
    }

    #[test]
    fn test_stack_trace_starts_at_caller() {
        let mut tracer = Tracer::new(
            config().with_stack_trace_threshold(Duration::ZERO),
            start(),
        );
        let token = tracer.start_segment(at(0));
        tracer.end_basic_segment(token, at(1), "slow");

        let nodes = tracer.trace().nodes();
        let stack = nodes[0].params.as_ref().unwrap().stack_trace.as_ref().unwrap();
        let frames = stack.symbolize();
        assert!(!frames.is_empty());
        assert!(!is_agent_symbol(&frames[0]), "{:?}", frames[0]);
    }

    #[test]
    fn test_datastore_query_parameters_gated() {
        let mut tracer = Tracer::new(
            config().with_stack_trace_threshold(Duration::from_secs(2)),
            start(),
        );
        let segment = DatastoreSegment::new("MySQL", "SELECT")
            .with_query("SELECT * FROM t WHERE zip = ?")
            .with_query_parameters(vec![("zip", serde_json::json!(1))]);

        let fast = tracer.start_segment(at(0));
        tracer.end_datastore_segment(fast, at(1), segment.clone());
        let slow = tracer.start_segment(at(1));
        tracer.end_datastore_segment(slow, at(4), segment);

        let nodes = tracer.trace().nodes();
        let fast = nodes[0].params.as_ref().unwrap().datastore().unwrap();
        assert!(fast.query_parameters.is_none());
        assert_eq!(fast.query.as_deref(), Some("SELECT * FROM t WHERE zip = ?"));

        let slow = nodes[1].params.as_ref().unwrap().datastore().unwrap();
        assert!(slow.query_parameters.is_some());
    }

    #[test]
    fn test_external_without_url() {
        let mut tracer = Tracer::new(config(), start());
        let token = tracer.start_segment(at(1));
        tracer.end_external_segment(token, at(2), None);

        let nodes = tracer.trace().nodes();
        assert_eq!(nodes[0].name, "External/unknown/all");
        assert!(nodes[0].params.is_none());
    }

    #[test]
    fn test_rejected_node_skips_stack_capture() {
        let mut tracer = Tracer::new(
            config()
                .with_stack_trace_threshold(Duration::ZERO)
                .with_max_nodes(1),
            start(),
        );
        let long = tracer.start_segment(at(0));
        tracer.end_basic_segment(long, at(10), "long");
        let short = tracer.start_segment(at(10));
        tracer.end_basic_segment(short, at(11), "short");

        assert_eq!(names(&tracer), vec!["Custom/long"]);
        assert!(matches!(
            tracer.trace().nodes()[0].params.as_ref().map(|p| &p.segment),
            Some(SegmentParams::Basic)
        ));
    }
}
