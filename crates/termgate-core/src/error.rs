use thiserror::Error;

/// Errors produced by the termgate protocol layer.
#[derive(Debug, Error)]
pub enum TermgateError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type TermgateResult<T> = Result<T, TermgateError>;
