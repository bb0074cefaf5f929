use mnemon_domain::PatternStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidLifecycleTransition {
        from: PatternStatus,
        to: PatternStatus,
    },

    #[error("supersedes lineage contains a cycle through {0}")]
    LineageCycle(String),

    #[error("aggregated pair confidence {score:.2} below required {required:.2}")]
    InsufficientEvidence { score: f64, required: f64 },

    #[error("lease held by {holder}; retry via redelivery")]
    LeaseConflict { holder: String },

    #[error("fsm error: {0}")]
    Fsm(#[from] mnemon_fsm::FsmError),

    #[error("store error: {0}")]
    Store(#[from] mnemon_store::StoreError),

    #[error("memory service error: {0}")]
    Memory(#[from] mnemon_memsvc::MemoryRpcError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("domain error: {0}")]
    Domain(#[from] mnemon_domain::DomainError),
}
