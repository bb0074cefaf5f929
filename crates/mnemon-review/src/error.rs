use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("store error: {0}")]
    Store(#[from] mnemon_store::StoreError),

    #[error("domain error: {0}")]
    Domain(#[from] mnemon_domain::DomainError),

    #[error("pattern error: {0}")]
    Pattern(#[from] mnemon_patterns::PatternError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
