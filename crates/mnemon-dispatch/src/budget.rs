use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mnemon_domain::EventKind;
use tracing::warn;

/// Rolling-window failure budget parameters.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Window over which failures are counted.
    pub window: Duration,
    /// Failures inside the window that trip the breaker.
    pub max_failures: u32,
    /// How long a tripped breaker stays open before a probe is allowed.
    pub cooldown: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_failures: 10,
            cooldown: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Default)]
struct KindBudget {
    failures: VecDeque<DateTime<Utc>>,
    open_until: Option<DateTime<Utc>>,
}

/// Per-handler rolling failure budget with a circuit breaker.
///
/// `Reject` outcomes and repeated transient failures count against the
/// budget; exceeding it opens the circuit for the cooldown period, during
/// which the dispatcher refuses messages of that kind and lets bus lag
/// apply pressure upstream. Time is always passed in, never read here.
pub struct FailureBudget {
    config: BudgetConfig,
    by_kind: Mutex<HashMap<EventKind, KindBudget>>,
}

impl FailureBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config, by_kind: Mutex::new(HashMap::new()) }
    }

    /// Record one counted failure. Returns true when this failure tripped
    /// the breaker open.
    pub fn record_failure(&self, kind: EventKind, now: DateTime<Utc>) -> bool {
        let mut guard = self.by_kind.lock().expect("budget lock poisoned");
        let budget = guard.entry(kind).or_default();

        let window = chrono::Duration::from_std(self.config.window).expect("window fits");
        budget.failures.push_back(now);
        while let Some(front) = budget.failures.front() {
            if *front <= now - window {
                budget.failures.pop_front();
            } else {
                break;
            }
        }

        if budget.open_until.is_none() && budget.failures.len() as u32 > self.config.max_failures {
            let cooldown = chrono::Duration::from_std(self.config.cooldown).expect("cooldown fits");
            budget.open_until = Some(now + cooldown);
            warn!(kind = %kind, failures = budget.failures.len(), "failure budget exceeded, circuit open");
            return true;
        }
        false
    }

    /// A success closes the circuit and clears the window.
    pub fn record_success(&self, kind: EventKind) {
        let mut guard = self.by_kind.lock().expect("budget lock poisoned");
        if let Some(budget) = guard.get_mut(&kind) {
            budget.failures.clear();
            budget.open_until = None;
        }
    }

    /// Whether the circuit for `kind` is open at `now`. An elapsed cooldown
    /// closes it (half-open probe: the next message is allowed through).
    pub fn is_open(&self, kind: EventKind, now: DateTime<Utc>) -> bool {
        let mut guard = self.by_kind.lock().expect("budget lock poisoned");
        if let Some(budget) = guard.get_mut(&kind) {
            match budget.open_until {
                Some(until) if now < until => return true,
                Some(_) => {
                    budget.open_until = None;
                    budget.failures.clear();
                }
                None => {}
            }
        }
        false
    }

    /// Kinds whose circuit is currently open, for the health surface.
    pub fn open_kinds(&self, now: DateTime<Utc>) -> Vec<EventKind> {
        let guard = self.by_kind.lock().expect("budget lock poisoned");
        guard
            .iter()
            .filter(|(_, b)| b.open_until.is_some_and(|until| now < until))
            .map(|(k, _)| *k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn config() -> BudgetConfig {
        BudgetConfig {
            window: Duration::from_secs(60),
            max_failures: 3,
            cooldown: Duration::from_secs(120),
        }
    }

    #[test]
    fn trips_after_budget_exceeded() {
        let budget = FailureBudget::new(config());
        let now = t("2026-03-01T00:00:00Z");
        for _ in 0..3 {
            assert!(!budget.record_failure(EventKind::FixApplied, now));
        }
        assert!(budget.record_failure(EventKind::FixApplied, now));
        assert!(budget.is_open(EventKind::FixApplied, now));
        // Other kinds stay healthy.
        assert!(!budget.is_open(EventKind::FindingObserved, now));
    }

    #[test]
    fn failures_age_out_of_the_window() {
        let budget = FailureBudget::new(config());
        for i in 0..3 {
            let at = t("2026-03-01T00:00:00Z") + chrono::Duration::seconds(i);
            budget.record_failure(EventKind::FixApplied, at);
        }
        // Two minutes later the window is empty; one more failure does not trip.
        let later = t("2026-03-01T00:02:30Z");
        assert!(!budget.record_failure(EventKind::FixApplied, later));
        assert!(!budget.is_open(EventKind::FixApplied, later));
    }

    #[test]
    fn cooldown_elapses_and_circuit_closes() {
        let budget = FailureBudget::new(config());
        let now = t("2026-03-01T00:00:00Z");
        for _ in 0..4 {
            budget.record_failure(EventKind::FixApplied, now);
        }
        assert!(budget.is_open(EventKind::FixApplied, now));
        assert!(!budget.is_open(EventKind::FixApplied, t("2026-03-01T00:02:01Z")));
    }

    #[test]
    fn success_resets_the_window() {
        let budget = FailureBudget::new(config());
        let now = t("2026-03-01T00:00:00Z");
        for _ in 0..3 {
            budget.record_failure(EventKind::FixApplied, now);
        }
        budget.record_success(EventKind::FixApplied);
        assert!(!budget.record_failure(EventKind::FixApplied, now));
    }
}
