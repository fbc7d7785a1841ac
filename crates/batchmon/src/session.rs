use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use batchcore::gateway::schema::decode_session_id;
use batchcore::gateway::{GatewayError, PersistenceGateway, Statement};
use batchcore::{SessionId, SessionState};

#[derive(Debug, Error)]
pub enum SessionError {
    /// The session subsystem cannot work at all.
    #[error("{0}")]
    Fatal(String),
    #[error("{0}")]
    Recoverable(String),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Fatal(_))
    }
}

impl From<GatewayError> for SessionError {
    fn from(error: GatewayError) -> Self {
        if error.is_fatal() {
            SessionError::Fatal(error.to_string())
        } else {
            SessionError::Recoverable(error.to_string())
        }
    }
}

/// Closes sessions that were idle for longer than their timeout.
pub trait SessionCloser: Send + Sync {
    fn list_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<SessionId>, SessionError>;

    fn close_session(&self, id: &SessionId) -> Result<(), SessionError>;
}

/// Closes sessions directly in the `vsession` table.
pub struct GatewaySessionCloser {
    gateway: Arc<dyn PersistenceGateway>,
}

impl GatewaySessionCloser {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }
}

impl SessionCloser for GatewaySessionCloser {
    fn list_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<SessionId>, SessionError> {
        let mut connection = self.gateway.acquire()?;
        let result = connection.query(
            &Statement::new(
                "SELECT sessionid FROM vsession
                 WHERE state = ?1 AND last_access + timeout < ?2
                 ORDER BY last_access",
            )
            .bind(SessionState::Active.code())
            .bind(now),
        )?;
        let mut sessions = Vec::with_capacity(result.row_count());
        for row in result.rows() {
            match decode_session_id(&row) {
                Ok(id) => sessions.push(id),
                Err(error) => log::error!("Skipping expired session: {error}"),
            }
        }
        Ok(sessions)
    }

    fn close_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let mut connection = self.gateway.acquire()?;
        let closed = connection.execute(
            &Statement::new(
                "UPDATE vsession SET state = ?1, closure_date = ?2
                 WHERE sessionid = ?3 AND state = ?4",
            )
            .bind(SessionState::Closed.code())
            .bind(Utc::now())
            .bind(id.as_str())
            .bind(SessionState::Active.code()),
        )?;
        if closed == 0 {
            log::debug!("Session {id} was already closed");
        }
        Ok(())
    }
}
