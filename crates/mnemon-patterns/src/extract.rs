use serde_json::{json, Value};

use mnemon_domain::{SuccessCriteria, SuccessPredicate};

use crate::signature::signature_hash;
use crate::trace::{NormalizedTrace, TraceStep};

/// Actions that count as verification of the work preceding them.
const VERIFY_ACTIONS: &[&str] = &["test", "check", "build", "lint"];

/// A candidate pattern produced by extraction, before any storage concern.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPattern {
    pub pattern_type: String,
    pub name: String,
    /// The essential structure the signature is computed over. File paths
    /// and timestamps are deliberately absent: two sessions doing the same
    /// thing to different files yield the same signature.
    pub essential: Value,
    pub signature_hash: String,
    pub success_criteria: SuccessCriteria,
    pub quality_metrics: Value,
}

/// Pure second stage of the learning pipeline.
///
/// Two shapes are recognized:
/// - an *edit sequence*: a maximal run of successful steps containing at
///   least one edit and ending in a verification action;
/// - a *recovery sequence*: a failed step immediately retried with the same
///   tool and action, succeeding.
pub fn extract_patterns(trace: &NormalizedTrace) -> Vec<ExtractedPattern> {
    let mut patterns = Vec::new();
    patterns.extend(extract_edit_sequences(&trace.steps));
    patterns.extend(extract_recovery_sequences(&trace.steps));
    patterns
}

fn is_verify(step: &TraceStep) -> bool {
    VERIFY_ACTIONS.contains(&step.action.as_str())
}

fn extract_edit_sequences(steps: &[TraceStep]) -> Vec<ExtractedPattern> {
    let mut out = Vec::new();
    let mut run: Vec<&TraceStep> = Vec::new();

    for step in steps {
        if !step.success {
            run.clear();
            continue;
        }
        run.push(step);
        if is_verify(step) && run.iter().any(|s| s.action == "edit") {
            out.push(build_edit_pattern(&run));
            run.clear();
        }
    }
    out
}

fn build_edit_pattern(run: &[&TraceStep]) -> ExtractedPattern {
    let essential_steps: Vec<Value> = run
        .iter()
        .map(|s| json!({"tool": s.tool, "action": s.action}))
        .collect();
    let essential = json!({
        "pattern_type": "edit_sequence",
        "steps": essential_steps,
    });
    let first = run.first().map(|s| s.action.as_str()).unwrap_or("edit");
    let last = run.last().map(|s| s.action.as_str()).unwrap_or("test");

    ExtractedPattern {
        pattern_type: "edit_sequence".to_string(),
        name: format!("{first}-then-{last}"),
        signature_hash: signature_hash(&essential),
        essential,
        success_criteria: SuccessCriteria {
            predicates: vec![
                SuccessPredicate { name: "verification_passed".into(), weight: 2.0 },
                SuccessPredicate { name: "no_followup_failure".into(), weight: 1.0 },
            ],
            threshold: 0.6,
        },
        quality_metrics: json!({
            "step_count": run.len(),
            "distinct_tools": run
                .iter()
                .map(|s| s.tool.as_str())
                .collect::<std::collections::BTreeSet<_>>()
                .len(),
        }),
    }
}

fn extract_recovery_sequences(steps: &[TraceStep]) -> Vec<ExtractedPattern> {
    let mut out = Vec::new();
    for pair in steps.windows(2) {
        let (failed, retried) = (&pair[0], &pair[1]);
        if !failed.success
            && retried.success
            && failed.tool == retried.tool
            && failed.action == retried.action
        {
            let essential = json!({
                "pattern_type": "recovery_sequence",
                "tool": retried.tool,
                "action": retried.action,
            });
            out.push(ExtractedPattern {
                pattern_type: "recovery_sequence".to_string(),
                name: format!("retry-{}-{}", retried.tool, retried.action),
                signature_hash: signature_hash(&essential),
                essential,
                success_criteria: SuccessCriteria {
                    predicates: vec![SuccessPredicate {
                        name: "retry_succeeded".into(),
                        weight: 1.0,
                    }],
                    threshold: 1.0,
                },
                quality_metrics: json!({"attempts": 2}),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::parse_trace;
    use mnemon_domain::TraceEvent;
    use serde_json::Value;

    fn event(seq: u64, tool: &str, action: &str, success: bool) -> TraceEvent {
        TraceEvent {
            seq,
            tool_name: tool.to_string(),
            action: action.to_string(),
            file_path: Some(format!("src/file{seq}.rs")),
            success,
            occurred_at: "2026-03-01T00:00:00Z".parse().unwrap(),
            detail: Value::Null,
        }
    }

    #[test]
    fn edit_then_test_yields_one_pattern() {
        let trace = parse_trace(&[
            event(1, "editor", "edit", true),
            event(2, "cargo", "test", true),
        ]);
        let patterns = extract_patterns(&trace);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type, "edit_sequence");
        assert_eq!(patterns[0].name, "edit-then-test");
        assert_eq!(patterns[0].signature_hash.len(), 64);
    }

    #[test]
    fn signature_ignores_file_paths() {
        let a = parse_trace(&[
            event(1, "editor", "edit", true),
            event(2, "cargo", "test", true),
        ]);
        let mut raw = vec![
            event(1, "editor", "edit", true),
            event(2, "cargo", "test", true),
        ];
        raw[0].file_path = Some("completely/else.rs".into());
        let b = parse_trace(&raw);
        assert_eq!(
            extract_patterns(&a)[0].signature_hash,
            extract_patterns(&b)[0].signature_hash
        );
    }

    #[test]
    fn failed_run_extracts_nothing() {
        let trace = parse_trace(&[
            event(1, "editor", "edit", true),
            event(2, "cargo", "test", false),
        ]);
        let patterns = extract_patterns(&trace);
        assert!(patterns.iter().all(|p| p.pattern_type != "edit_sequence"));
    }

    #[test]
    fn retry_after_failure_is_a_recovery() {
        let trace = parse_trace(&[
            event(1, "cargo", "build", false),
            event(2, "cargo", "build", true),
        ]);
        let patterns = extract_patterns(&trace);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type, "recovery_sequence");
        assert_eq!(patterns[0].name, "retry-cargo-build");
    }

    #[test]
    fn extraction_is_deterministic() {
        let trace = parse_trace(&[
            event(1, "editor", "edit", true),
            event(2, "cargo", "check", true),
            event(3, "cargo", "build", false),
            event(4, "cargo", "build", true),
        ]);
        assert_eq!(extract_patterns(&trace), extract_patterns(&trace));
        assert_eq!(extract_patterns(&trace).len(), 2);
    }
}
