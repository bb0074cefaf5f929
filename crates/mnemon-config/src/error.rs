use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {option}: {message}")]
    InvalidValue { option: &'static str, message: String },

    #[error("{option} is set but {requires} is not; both are needed to enable consumers")]
    InconsistentOptions {
        option: &'static str,
        requires: &'static str,
    },
}
