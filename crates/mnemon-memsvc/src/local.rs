use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::{MemoryOp, MemoryRequest, MemoryService};
use crate::error::MemoryRpcError;

/// No-broker stand-in for the memory service.
///
/// Upserts are remembered by id so tests can assert what the pipeline
/// mirrored; queries return empty result sets.
#[derive(Default)]
pub struct LocalMemoryService {
    vectors: Mutex<HashMap<String, Value>>,
}

impl LocalMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upserted_ids(&self) -> Vec<String> {
        let guard = self.vectors.lock().expect("vectors lock poisoned");
        let mut ids: Vec<String> = guard.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MemoryService for LocalMemoryService {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn call(&self, request: MemoryRequest) -> Result<Value, MemoryRpcError> {
        match request.op {
            MemoryOp::UpsertVector | MemoryOp::GraphUpsert => {
                let id = request.payload["id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.vectors
                    .lock()
                    .expect("vectors lock poisoned")
                    .insert(id, request.payload);
                Ok(json!({"stored": true}))
            }
            MemoryOp::QuerySimilar | MemoryOp::GraphQuery => Ok(json!({"matches": []})),
        }
    }
}
