//! Call-stack snapshots attached to slow segments

use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::ffi::c_void;

/// Frames kept per snapshot
pub const MAX_STACK_FRAMES: usize = 100;

/// Symbol prefixes of the frames between the application and the capture
/// point: the unwinder itself and the tracer's end-of-segment path.
const AGENT_SYMBOL_PREFIXES: &[&str] = &[
    "backtrace::",
    "txntrace::trace::stack::StackTrace",
    "txntrace::trace::txn::TxnTrace",
    "txntrace::trace::tracer::Tracer",
];

pub(crate) fn is_agent_symbol(name: &str) -> bool {
    let name = name.trim_start_matches('<');
    AGENT_SYMBOL_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Whether every symbol at this frame belongs to the agent. Frames that do
/// not resolve count as application frames.
fn is_agent_frame(frame: &backtrace::Frame) -> bool {
    let mut resolved = false;
    let mut agent = true;
    backtrace::resolve_frame(frame, |symbol| {
        resolved = true;
        let name = symbol.name().map(|n| format!("{:#}", n));
        if !name.as_deref().is_some_and(is_agent_symbol) {
            agent = false;
        }
    });
    resolved && agent
}

/// Raw instruction pointers captured when a segment ends.
///
/// Capture walks the stack and resolves only the leading agent frames so
/// they can be dropped; the application's frames are symbolized when the
/// trace is encoded, which happens once per harvested trace.
#[derive(Debug, Clone, Default)]
pub struct StackTrace {
    frames: Vec<usize>,
}

impl StackTrace {
    #[inline(never)]
    pub fn capture() -> Self {
        let mut frames = Vec::with_capacity(32);
        let mut leading = true;
        backtrace::trace(|frame| {
            if leading {
                if is_agent_frame(frame) {
                    return true;
                }
                leading = false;
            }
            frames.push(frame.ip() as usize);
            frames.len() < MAX_STACK_FRAMES
        });
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Resolve each frame to `symbol (file:line)`
    pub fn symbolize(&self) -> Vec<String> {
        self.frames.iter().map(|&ip| resolve_frame(ip)).collect()
    }
}

fn resolve_frame(ip: usize) -> String {
    let mut line = None;
    backtrace::resolve(ip as *mut c_void, |symbol| {
        if line.is_some() {
            return;
        }
        let name = symbol
            .name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        line = Some(match (symbol.filename(), symbol.lineno()) {
            (Some(file), Some(lineno)) => format!("{} ({}:{})", name, file.display(), lineno),
            _ => name,
        });
    });
    line.unwrap_or_else(|| format!("{:#x}", ip))
}

impl Serialize for StackTrace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.frames.len()))?;
        for &ip in &self.frames {
            seq.serialize_element(&resolve_frame(ip))?;
        }
        seq.end()
    }
}
