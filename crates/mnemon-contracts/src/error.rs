use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml parse error in {path}: {source}")]
    YamlParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid topic '{topic}' in {path}: {message}")]
    InvalidTopic {
        path: String,
        topic: String,
        message: String,
    },

    #[error("unknown message kind '{kind}' in {path}")]
    UnknownKind { path: String, kind: String },

    #[error(
        "ambiguous subscription: ({kind}, v{version}) is bound to both '{first}' and '{second}'"
    )]
    AmbiguousOverlap {
        kind: String,
        version: u32,
        first: String,
        second: String,
    },

    #[error("no contract files found under {0}")]
    Empty(String),

    #[error("multiple contract errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ContractError>),
}
