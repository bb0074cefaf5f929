use mnemon_domain::{FsmAction, FsmKind, FsmState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsmError {
    #[error("invalid transition: {kind} has no edge ({from}, {action})")]
    InvalidTransition {
        kind: FsmKind,
        from: FsmState,
        action: FsmAction,
    },

    #[error("declared target {declared} does not match edge target {actual}")]
    TargetMismatch {
        declared: FsmState,
        actual: FsmState,
    },

    #[error("store error: {0}")]
    Store(#[from] mnemon_store::StoreError),
}
