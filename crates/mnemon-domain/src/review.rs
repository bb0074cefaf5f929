use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{FindingId, FixId, PairId};

// ── Severity ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
            Severity::Hint => write!(f, "hint"),
        }
    }
}

// ── Commit sha ────────────────────────────────────────────────────────────────

/// An abbreviated or full git object id: 7 to 40 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitSha(pub String);

impl CommitSha {
    pub fn parse(s: impl Into<String>) -> Result<Self, DomainError> {
        let s = s.into();
        let ok = (7..=40).contains(&s.len())
            && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if ok {
            Ok(CommitSha(s))
        } else {
            Err(DomainError::InvalidCommitSha(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitSha {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Line ranges ───────────────────────────────────────────────────────────────

/// Inclusive line range, serialized as a two-element array `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange(pub u32, pub u32);

impl LineRange {
    pub fn new(start: u32, end: u32) -> Result<Self, DomainError> {
        if start > end {
            return Err(DomainError::InvalidLineRange { start, end });
        }
        Ok(LineRange(start, end))
    }

    /// A finding without `line_end` is treated as single-line.
    pub fn single(line: u32) -> Self {
        LineRange(line, line)
    }

    pub fn start(&self) -> u32 {
        self.0
    }

    pub fn end(&self) -> u32 {
        self.1
    }

    /// Number of lines shared with `other`; 0 when disjoint. Used by the
    /// same-commit pairing tie-break.
    pub fn overlap(&self, other: &LineRange) -> u32 {
        let lo = self.0.max(other.0);
        let hi = self.1.min(other.1);
        if lo > hi { 0 } else { hi - lo + 1 }
    }
}

// ── Pairing type ──────────────────────────────────────────────────────────────

/// How a finding and a fix commit were associated. Each pairing type carries
/// the initial confidence assigned when the candidate pair is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingType {
    Autofix,
    SameCommit,
    SamePr,
    Temporal,
    Inferred,
}

impl PairingType {
    pub fn initial_confidence(&self) -> f64 {
        match self {
            PairingType::Autofix => 0.95,
            PairingType::SameCommit => 0.85,
            PairingType::SamePr => 0.70,
            PairingType::Temporal => 0.50,
            PairingType::Inferred => 0.30,
        }
    }
}

impl std::fmt::Display for PairingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PairingType::Autofix => "autofix",
            PairingType::SameCommit => "same_commit",
            PairingType::SamePr => "same_pr",
            PairingType::Temporal => "temporal",
            PairingType::Inferred => "inferred",
        };
        write!(f, "{}", s)
    }
}

// ── Entities ──────────────────────────────────────────────────────────────────

/// A persisted review finding, as observed by a review tool on a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub finding_id: FindingId,
    pub repo: String,
    pub pr_id: i64,
    pub rule_id: String,
    pub severity: Severity,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: Option<u32>,
    pub tool_name: String,
    pub tool_version: String,
    pub normalized_message: String,
    pub raw_message: String,
    pub commit_sha_observed: CommitSha,
    pub observed_at: DateTime<Utc>,
}

impl ReviewFinding {
    /// The range pairing intersects against; missing `line_end` means
    /// `[line_start, line_start]`.
    pub fn line_range(&self) -> LineRange {
        match self.line_end {
            Some(end) if end >= self.line_start => LineRange(self.line_start, end),
            _ => LineRange::single(self.line_start),
        }
    }
}

/// A persisted fix application against a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFix {
    pub fix_id: FixId,
    pub finding_id: FindingId,
    pub fix_commit_sha: CommitSha,
    pub file_path: String,
    pub diff_hunks: Vec<String>,
    pub touched_line_range: LineRange,
    pub tool_autofix: bool,
    pub applied_at: DateTime<Utc>,
}

/// A confidence-scored association between a finding and a fix commit.
/// At most one pair exists per `(finding_id, fix_commit_sha)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingFixPair {
    pub pair_id: PairId,
    pub finding_id: FindingId,
    pub fix_commit_sha: CommitSha,
    pub diff_hunks: Vec<String>,
    pub confidence_score: f64,
    pub disappearance_confirmed: bool,
    pub pairing_type: PairingType,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_sha_bounds() {
        assert!(CommitSha::parse("abc1234").is_ok());
        assert!(CommitSha::parse("a".repeat(40)).is_ok());
        assert!(CommitSha::parse("abc123").is_err()); // 6 chars
        assert!(CommitSha::parse("a".repeat(41)).is_err());
        assert!(CommitSha::parse("ABC1234").is_err()); // uppercase
        assert!(CommitSha::parse("abcdefg").is_err()); // 'g' is not hex
    }

    #[test]
    fn line_range_overlap() {
        let finding = LineRange(10, 12);
        assert_eq!(LineRange(9, 13).overlap(&finding), 3);
        assert_eq!(LineRange(12, 20).overlap(&finding), 1);
        assert_eq!(LineRange(13, 20).overlap(&finding), 0);
        assert_eq!(LineRange::single(10).overlap(&finding), 1);
    }

    #[test]
    fn missing_line_end_is_single_line() {
        let f = ReviewFinding {
            finding_id: FindingId::new("F1"),
            repo: "org/repo".into(),
            pr_id: 7,
            rule_id: "r1".into(),
            severity: Severity::Warning,
            file_path: "src/lib.rs".into(),
            line_start: 42,
            line_end: None,
            tool_name: "linter".into(),
            tool_version: "1.0".into(),
            normalized_message: "m".into(),
            raw_message: "m".into(),
            commit_sha_observed: CommitSha::parse("abc1234").unwrap(),
            observed_at: "2026-03-01T00:00:00Z".parse().unwrap(),
        };
        assert_eq!(f.line_range(), LineRange(42, 42));
    }

    #[test]
    fn pairing_confidence_table() {
        assert_eq!(PairingType::Autofix.initial_confidence(), 0.95);
        assert_eq!(PairingType::SameCommit.initial_confidence(), 0.85);
        assert_eq!(PairingType::SamePr.initial_confidence(), 0.70);
        assert_eq!(PairingType::Temporal.initial_confidence(), 0.50);
        assert_eq!(PairingType::Inferred.initial_confidence(), 0.30);
    }
}
