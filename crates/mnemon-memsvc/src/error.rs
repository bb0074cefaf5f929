use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryRpcError {
    #[error("memory service transport error: {0}")]
    Transport(String),

    #[error("memory service rejected {op}: {code}: {message}")]
    Rpc {
        op: String,
        code: String,
        message: String,
    },

    #[error("memory service circuit open after {failures} consecutive failures")]
    CircuitOpen { failures: u32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryRpcError {
    /// Transport failures are retryable; an explicit RPC rejection is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, MemoryRpcError::Transport(_) | MemoryRpcError::CircuitOpen { .. })
    }
}
