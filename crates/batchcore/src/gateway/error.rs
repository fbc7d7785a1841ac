use thiserror::Error;

use crate::common::error::CoreError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The store cannot be reached or is no longer usable.
    #[error("Database connection error: {0}")]
    Connection(String),
    #[error("Statement `{sql}` failed: {message}")]
    Statement { sql: String, message: String },
    #[error("Transaction error: {0}")]
    Transaction(String),
    #[error("Cannot decode column `{column}`: {message}")]
    Decode { column: String, message: String },
}

impl GatewayError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Connection(_))
    }

    pub(crate) fn decode(column: &str, message: impl ToString) -> Self {
        GatewayError::Decode {
            column: column.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<CoreError> for GatewayError {
    fn from(error: CoreError) -> Self {
        GatewayError::Decode {
            column: String::new(),
            message: error.to_string(),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
