use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("schema version mismatch: database has {found}, binary expects {expected}")]
    SchemaMismatch { found: i32, expected: i32 },

    #[error("installed-by fingerprint '{found}' is not a valid mnemon fingerprint")]
    BadFingerprint { found: String },

    #[error("db_metadata row missing; run `mnemon migrate` first")]
    MetadataMissing,

    #[error("migration {number} ({name}) failed: {message}")]
    Migration {
        number: u32,
        name: &'static str,
        message: String,
    },

    #[error("supersedes edge {from} -> {to} would create a cycle")]
    LineageCycle { from: String, to: String },

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether a caller may treat the failure as transient I/O.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Internal(_))
    }
}
