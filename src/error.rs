use thiserror::Error;

/// Errors returned by the collapse routine, the LoD helpers and the codec.
///
/// All validation runs before any output is produced, so an `Err` never
/// comes with a partial result.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed boundaries, LoD or tensor shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported stream version {0} (only version 0 is supported)")]
    UnsupportedVersion(u32),

    #[error("truncated stream: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}
