use thiserror::Error;

pub type PulseResult<T> = Result<T, PulseError>;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Event store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PulseError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
