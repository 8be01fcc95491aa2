use thiserror::Error;

/// Malformed requests, rejected before any pipeline stage runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("query text or file is required")]
    MissingQuery,
    #[error("query text has {len} characters, the limit is {max}")]
    QueryTooLong { len: usize, max: usize },
    #[error("top_k must be between 1 and {max}, got {got}")]
    TopKOutOfRange { got: usize, max: usize },
    #[error("question is required")]
    MissingQuestion,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    #[error("internal failure: {0}")]
    Internal(#[from] anyhow::Error),
}
