pub mod client;
pub mod error;
pub mod http;
pub mod local;

pub use client::{MemoryOp, MemoryRequest, MemoryResponse, MemoryService};
pub use error::MemoryRpcError;
pub use http::{HttpMemoryService, HttpMemoryServiceConfig};
pub use local::LocalMemoryService;
