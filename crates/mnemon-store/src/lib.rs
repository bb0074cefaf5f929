pub mod error;
pub mod handshake;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod rows;
pub mod store;

pub use error::StoreError;
pub use handshake::{boot_handshake, installed_by_fingerprint};
pub use memory::InMemoryStore;
pub use migrations::{Migration, EXPECTED_SCHEMA_VERSION, MIGRATIONS};
pub use postgres::PostgresStore;
pub use rows::{
    DbMetadata, DisableEventRow, DomainTaxonomyRow, FsmHistoryRow, FsmInstance,
    LeaseOutcome, LifecycleTransitionRow, PatternLifecycleRow, TransitionOutcome,
    WorkflowExecution, WorkflowStatus, DEFAULT_SESSION_DURATION_CEILING_MS,
};
pub use store::{FeedbackStore, FsmStore, MetaStore, PairInsert, PatternStore, ReviewStore, Store};
