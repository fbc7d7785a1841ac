use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::CoreError;

crate::define_str_id_type!(SessionId);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    Closed,
    Active,
}

impl SessionState {
    pub fn code(self) -> i64 {
        match self {
            SessionState::Closed => 0,
            SessionState::Active => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, CoreError> {
        match code {
            0 => Ok(SessionState::Closed),
            1 => Ok(SessionState::Active),
            _ => Err(CoreError::UnknownSessionState(code)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub last_access: DateTime<Utc>,
    pub timeout: TimeDelta,
    pub state: SessionState,
}

impl SessionRecord {
    /// A session is expired only once its deadline lies strictly in the past.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == SessionState::Active && self.last_access + self.timeout < now
    }
}
