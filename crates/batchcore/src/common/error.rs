use thiserror::Error;

/// Errors raised while converting persisted values into the canonical model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown job status code {0}")]
    UnknownJobStatus(i64),
    #[error("Unknown transfer status code {0}")]
    UnknownTransferStatus(i64),
    #[error("Unknown session state code {0}")]
    UnknownSessionState(i64),
    #[error("Unknown backend type `{0}`")]
    UnknownBackendType(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<String> for CoreError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for CoreError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
