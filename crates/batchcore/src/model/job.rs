use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::CoreError;
use crate::model::backend::BackendDescriptor;

crate::define_str_id_type!(JobId);

/// Canonical job status.
///
/// The variants form a strict total order. Everything below [`JobStatus::Completed`] is active and
/// is re-checked by reconciliation, everything from `Completed` upwards is terminal.
#[derive(
    Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum JobStatus {
    #[default]
    Undefined = 0,
    Submitted = 1,
    Queued = 2,
    Waiting = 3,
    Running = 4,
    Completed = 5,
    Cancelled = 6,
    Downloaded = 7,
    Failed = 8,
}

impl JobStatus {
    pub const FIRST_ACTIVE: JobStatus = JobStatus::Undefined;
    pub const FIRST_TERMINAL: JobStatus = JobStatus::Completed;

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Result<Self, CoreError> {
        let status = match code {
            0 => JobStatus::Undefined,
            1 => JobStatus::Submitted,
            2 => JobStatus::Queued,
            3 => JobStatus::Waiting,
            4 => JobStatus::Running,
            5 => JobStatus::Completed,
            6 => JobStatus::Cancelled,
            7 => JobStatus::Downloaded,
            8 => JobStatus::Failed,
            _ => return Err(CoreError::UnknownJobStatus(code)),
        };
        Ok(status)
    }

    /// Returns true if the job still has to be tracked by reconciliation.
    pub fn is_active(self) -> bool {
        self >= Self::FIRST_ACTIVE && self < Self::FIRST_TERMINAL
    }

    pub fn is_terminal(self) -> bool {
        self >= Self::FIRST_TERMINAL
    }

    /// Combines the current status with a freshly reported one.
    ///
    /// The result never goes backwards in the canonical order and a terminal status is never
    /// replaced.
    pub fn advance(self, reported: JobStatus) -> JobStatus {
        if self.is_terminal() {
            self
        } else {
            self.max(reported)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Undefined => "UNDEFINED",
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Waiting => "WAITING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Downloaded => "DOWNLOADED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as persisted by the platform.
///
/// The serialized form of this structure is the descriptor handed to backends that cannot answer
/// a state query from a bare native identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    /// Identifier assigned by the backend (batch job id, pid, VM based id).
    pub native_id: String,
    pub owner: String,
    pub submit_machine: String,
    pub backend: BackendDescriptor,
    pub status: JobStatus,
    pub vm_address: Option<String>,
    pub vm_id: Option<String>,
    pub submit_date: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        native_id: String,
        owner: String,
        submit_machine: String,
        backend: BackendDescriptor,
    ) -> Self {
        Self {
            id,
            native_id,
            owner,
            submit_machine,
            backend,
            status: JobStatus::Undefined,
            vm_address: None,
            vm_id: None,
            submit_date: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn to_descriptor(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_descriptor(descriptor: &str) -> serde_json::Result<Self> {
        serde_json::from_str(descriptor)
    }
}
