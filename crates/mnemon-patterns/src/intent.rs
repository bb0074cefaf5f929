use mnemon_domain::{ClaudeHookEventV1, HookKind, Intent};

/// Pure intent classification over a session's hook events.
///
/// Scores each intent from coarse activity shape and returns the winner
/// with a confidence proportional to its margin. `Unknown` with confidence
/// 0 when there is nothing to classify.
pub fn classify_intent(events: &[ClaudeHookEventV1]) -> (Intent, f64) {
    if events.is_empty() {
        return (Intent::Unknown, 0.0);
    }

    let edits = count(events, HookKind::FileEdited);
    let tools = count(events, HookKind::ToolInvoked);
    let commands = count(events, HookKind::CommandRun);
    let test_commands = events
        .iter()
        .filter(|e| {
            e.hook == HookKind::CommandRun
                && e.tool_name
                    .as_deref()
                    .map(|t| t.contains("test"))
                    .unwrap_or(false)
        })
        .count() as f64;

    // Same file edited repeatedly with test runs reads as debugging; many
    // distinct files as refactoring; edits with tests as implementing;
    // no edits at all as exploring or reviewing.
    let distinct_files = events
        .iter()
        .filter_map(|e| e.file_path.as_deref())
        .collect::<std::collections::BTreeSet<_>>()
        .len() as f64;

    let scores = [
        (Intent::Implement, edits + test_commands),
        (Intent::Refactor, if distinct_files >= 4.0 { edits + distinct_files } else { 0.0 }),
        (
            Intent::Debug,
            if edits > 0.0 && distinct_files <= 1.0 { test_commands * 2.0 + edits } else { 0.0 },
        ),
        (Intent::Review, if edits == 0.0 { tools } else { 0.0 }),
        (Intent::Explore, if edits == 0.0 && commands == 0.0 { tools + 1.0 } else { 0.0 }),
    ];

    let total: f64 = scores.iter().map(|(_, s)| s).sum();
    let (winner, best) = scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).expect("scores are finite"))
        .copied()
        .unwrap_or((Intent::Unknown, 0.0));

    if best <= 0.0 {
        return (Intent::Unknown, 0.0);
    }
    (winner, (best / total).clamp(0.0, 1.0))
}

fn count(events: &[ClaudeHookEventV1], hook: HookKind) -> f64 {
    events.iter().filter(|e| e.hook == hook).count() as f64
}
