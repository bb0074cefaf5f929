use mnemon_domain::TraceEvent;
use serde::{Deserialize, Serialize};

/// One normalized step of a session's tool stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub tool: String,
    pub action: String,
    pub file_path: Option<String>,
    pub success: bool,
}

/// A session trace after normalization: sequence-ordered, deduplicated, and
/// reduced to the fields extraction cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrace {
    pub steps: Vec<TraceStep>,
    pub failure_count: usize,
}

/// Pure first stage of the learning pipeline.
///
/// Sorts by `seq`, drops duplicate sequence numbers (redelivered hook
/// events carry the same seq) and strips payload detail down to the
/// normalized step shape. Same input, same output, no I/O.
pub fn parse_trace(raw: &[TraceEvent]) -> NormalizedTrace {
    let mut events: Vec<&TraceEvent> = raw.iter().collect();
    events.sort_by_key(|e| e.seq);
    events.dedup_by_key(|e| e.seq);

    let steps: Vec<TraceStep> = events
        .iter()
        .map(|e| TraceStep {
            tool: e.tool_name.clone(),
            action: e.action.clone(),
            file_path: e.file_path.clone(),
            success: e.success,
        })
        .collect();
    let failure_count = steps.iter().filter(|s| !s.success).count();

    NormalizedTrace { steps, failure_count }
}
