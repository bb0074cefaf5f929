use async_trait::async_trait;
use mnemon_domain::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MemoryRpcError;

/// Operations the external memory service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOp {
    UpsertVector,
    QuerySimilar,
    GraphUpsert,
    GraphQuery,
}

impl std::fmt::Display for MemoryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryOp::UpsertVector => "upsert_vector",
            MemoryOp::QuerySimilar => "query_similar",
            MemoryOp::GraphUpsert => "graph_upsert",
            MemoryOp::GraphQuery => "graph_query",
        };
        write!(f, "{}", s)
    }
}

/// Wire request: `{correlation_id, op, payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRequest {
    pub correlation_id: CorrelationId,
    pub op: MemoryOp,
    pub payload: Value,
}

/// Wire response: `{ok, result | error_code, error_message}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// RPC client for the external memory service. Vector and graph storage are
/// delegated entirely; nothing in this service holds embeddings in process.
#[async_trait]
pub trait MemoryService: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn call(&self, request: MemoryRequest) -> Result<Value, MemoryRpcError>;
}
