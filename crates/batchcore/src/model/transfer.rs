use serde::{Deserialize, Serialize};

use crate::common::error::CoreError;

crate::define_str_id_type!(TransferId);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    InProgress,
    Completed,
    Cancelled,
    Interrupted,
    Undefined,
}

impl TransferStatus {
    pub fn code(self) -> i64 {
        match self {
            TransferStatus::InProgress => 0,
            TransferStatus::Completed => 1,
            TransferStatus::Cancelled => 2,
            TransferStatus::Interrupted => 3,
            TransferStatus::Undefined => 4,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, CoreError> {
        let status = match code {
            0 => TransferStatus::InProgress,
            1 => TransferStatus::Completed,
            2 => TransferStatus::Cancelled,
            3 => TransferStatus::Interrupted,
            4 => TransferStatus::Undefined,
            _ => return Err(CoreError::UnknownTransferStatus(code)),
        };
        Ok(status)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileTransferRecord {
    pub id: TransferId,
    /// Pid of the agent process that performs the copy.
    pub process_id: i64,
    pub status: TransferStatus,
}
