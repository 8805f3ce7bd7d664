use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("malformed header '{0}': expected 'Name: Value'")]
    MalformedHeader(String),

    #[error("invalid header '{raw}': {reason}")]
    InvalidHeader { raw: String, reason: String },

    #[error("error sending request: {0:#}")]
    Transport(anyhow::Error),

    #[error("error sending request: timed out after {0:?}")]
    Timeout(Duration),

    #[error("tracer is {0}, expected created")]
    InvalidState(&'static str),
}
