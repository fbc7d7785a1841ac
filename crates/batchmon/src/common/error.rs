use thiserror::Error;

use crate::backend::BackendError;
use crate::monitor::MonitorError;
use crate::session::SessionError;
use batchcore::gateway::GatewayError;

use crate::common::error::BatchmonError::GenericError;

#[derive(Debug, Error)]
pub enum BatchmonError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Database error: {0}")]
    GatewayError(#[from] GatewayError),
    #[error("Backend error: {0}")]
    BackendError(#[from] BackendError),
    #[error("Session error: {0}")]
    SessionError(#[from] SessionError),
    #[error("Monitor error: {0}")]
    MonitorError(#[from] MonitorError),
    #[error("Model error: {0}")]
    CoreError(#[from] batchcore::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for BatchmonError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for BatchmonError {
    fn from(error: toml::de::Error) -> Self {
        Self::ConfigurationError(error.to_string())
    }
}

impl From<anyhow::Error> for BatchmonError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(format!("{error:?}"))
    }
}

impl From<String> for BatchmonError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}
