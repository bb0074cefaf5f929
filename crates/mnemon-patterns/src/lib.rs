pub mod error;
pub mod extract;
pub mod handlers;
pub mod intent;
pub mod lifecycle;
pub mod lineage;
pub mod pipeline;
pub mod signature;
pub mod trace;

pub use error::PatternError;
pub use extract::{extract_patterns, ExtractedPattern};
pub use intent::classify_intent;
pub use lifecycle::{LifecycleOutcome, LifecycleReducer};
pub use pipeline::{LearningPipeline, PipelineReport};
pub use signature::{canonical_json, signature_hash};
pub use trace::{parse_trace, NormalizedTrace, TraceStep};
