use thiserror::Error;

/// Errors produced by the relay.
///
/// Per-frame and per-reference failures are logged and turned into
/// pass-through behaviour by their callers; only startup errors reach `main`.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Decode(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
