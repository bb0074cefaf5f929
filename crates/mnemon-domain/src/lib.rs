pub mod envelope;
pub mod error;
pub mod events;
pub mod feedback;
pub mod fsm;
pub mod ids;
pub mod patterns;
pub mod review;

pub use envelope::{Envelope, EventKind};
pub use error::{DomainError, ErrorKind, Failure};
pub use events::*;
pub use feedback::{PatternInjection, RoutingFeedbackScore};
pub use fsm::{FsmAction, FsmKind, FsmState};
pub use ids::{
    CorrelationId, DomainId, EntityId, EventId, FindingId, FixId, MessageId, PairId, PatternId,
    ProducerId, ResolutionId, RunId, SessionId,
};
pub use patterns::{
    LearnedPattern, PatternCandidate, PatternStatus, SuccessCriteria, SuccessPredicate,
};
pub use review::{
    CommitSha, FindingFixPair, LineRange, PairingType, ReviewFinding, ReviewFix, Severity,
};
