//! Trace capture and harvest configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of nodes retained per transaction trace
pub const DEFAULT_MAX_NODES: usize = 256;

/// Per-transaction trace capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Whether segments are recorded at all
    pub enabled: bool,
    /// Segments shorter than this are never recorded
    #[serde(with = "duration_serde")]
    pub segment_threshold: Duration,
    /// Segments at least this long get a stack trace and full parameters
    #[serde(with = "duration_serde")]
    pub stack_trace_threshold: Duration,
    /// Maximum retained nodes per trace (0 = unlimited)
    pub max_nodes: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            segment_threshold: Duration::from_millis(2),
            stack_trace_threshold: Duration::from_millis(500),
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl TraceConfig {
    /// Config that records nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Create a trace config from environment variables
    /// TXNTRACE_ENABLED=true
    /// TXNTRACE_SEGMENT_THRESHOLD_MS=2
    /// TXNTRACE_STACK_TRACE_THRESHOLD_MS=500
    /// TXNTRACE_MAX_NODES=256
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = env_bool("TXNTRACE_ENABLED").unwrap_or(defaults.enabled);
        let segment_threshold = env_millis("TXNTRACE_SEGMENT_THRESHOLD_MS")
            .unwrap_or(defaults.segment_threshold);
        let stack_trace_threshold = env_millis("TXNTRACE_STACK_TRACE_THRESHOLD_MS")
            .unwrap_or(defaults.stack_trace_threshold);
        let max_nodes = env_parse::<usize>("TXNTRACE_MAX_NODES").unwrap_or(defaults.max_nodes);

        Self {
            enabled,
            segment_threshold,
            stack_trace_threshold,
            max_nodes,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_segment_threshold(mut self, threshold: Duration) -> Self {
        self.segment_threshold = threshold;
        self
    }

    pub fn with_stack_trace_threshold(mut self, threshold: Duration) -> Self {
        self.stack_trace_threshold = threshold;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }
}

/// Harvest cycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Run identifier assigned by the collector at connect time
    pub agent_run_id: String,
    /// Reporting interval
    #[serde(with = "duration_serde")]
    pub period: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            agent_run_id: String::new(),
            period: Duration::from_secs(60),
        }
    }
}

impl HarvestConfig {
    /// Create a harvest config from environment variables
    /// TXNTRACE_AGENT_RUN_ID=12345
    /// TXNTRACE_HARVEST_PERIOD_SECS=60
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let agent_run_id =
            std::env::var("TXNTRACE_AGENT_RUN_ID").unwrap_or(defaults.agent_run_id);
        let period = env_parse::<u64>("TXNTRACE_HARVEST_PERIOD_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.period);

        Self {
            agent_run_id,
            period,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}

/// `true`/`false` or `1`/`0`; anything else warns and yields `None`
fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => env_parse::<bool>(key),
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

/// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationHelper {
        secs: u64,
        #[serde(default)]
        nanos: u32,
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        DurationHelper {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = DurationHelper::deserialize(deserializer)?;
        Ok(Duration::new(helper.secs, helper.nanos))
    }
}
