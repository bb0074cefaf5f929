use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unreachable: {0}")]
    Unreachable(String),

    #[error("publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("subscribe to {topic} failed: {message}")]
    Subscribe { topic: String, message: String },

    #[error("no publish route for kind {0}")]
    NoPublishRoute(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("fleet is draining")]
    Draining,
}
