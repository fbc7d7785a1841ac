//! Tables touched by the job-management subsystem.
//!
//! Timestamps are UNIX seconds, statuses and backend types use the codes of the model enums.
use crate::gateway::error::GatewayResult;
use crate::gateway::value::RowRef;
use crate::model::backend::{BackendDescriptor, BackendType};
use crate::model::job::{JobId, JobRecord, JobStatus};
use crate::model::session::SessionId;
use crate::model::transfer::{FileTransferRecord, TransferId, TransferStatus};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vishnu (
    vishnuid TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS vsession (
    sessionid TEXT PRIMARY KEY,
    owner TEXT NOT NULL DEFAULT '',
    last_access INTEGER NOT NULL,
    timeout INTEGER NOT NULL,
    state INTEGER NOT NULL,
    closure_date INTEGER
);

CREATE TABLE IF NOT EXISTS job (
    id TEXT PRIMARY KEY,
    native_id TEXT NOT NULL,
    owner TEXT NOT NULL,
    submit_machine TEXT NOT NULL,
    batch_type INTEGER NOT NULL,
    batch_version TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL,
    vm_address TEXT,
    vm_id TEXT,
    submit_date INTEGER,
    start_date INTEGER,
    end_date INTEGER
);

CREATE INDEX IF NOT EXISTS job_candidates ON job (submit_machine, batch_type, status);

CREATE TABLE IF NOT EXISTS filetransfer (
    transfer_id TEXT PRIMARY KEY,
    process_id INTEGER NOT NULL,
    status INTEGER NOT NULL,
    owner TEXT NOT NULL DEFAULT '',
    source TEXT,
    destination TEXT,
    start_date INTEGER
);
"#;

/// Columns expected by [`decode_job`].
pub const JOB_COLUMNS: &str = "id, native_id, owner, submit_machine, batch_type, batch_version, \
     status, vm_address, vm_id, submit_date, start_date, end_date";

pub fn decode_job(row: &RowRef<'_>) -> GatewayResult<JobRecord> {
    let backend_type = BackendType::from_code(row.integer("batch_type")?)?;
    Ok(JobRecord {
        id: JobId::new(row.text("id")?),
        native_id: row.text("native_id")?.to_string(),
        owner: row.text("owner")?.to_string(),
        submit_machine: row.text("submit_machine")?.to_string(),
        backend: BackendDescriptor::new(
            backend_type,
            row.opt_text("batch_version")?.unwrap_or_default(),
        ),
        status: JobStatus::from_code(row.integer("status")?)?,
        vm_address: row.opt_text("vm_address")?.map(|s| s.to_string()),
        vm_id: row.opt_text("vm_id")?.map(|s| s.to_string()),
        submit_date: row.opt_timestamp("submit_date")?,
        start_date: row.opt_timestamp("start_date")?,
        end_date: row.opt_timestamp("end_date")?,
    })
}

pub const TRANSFER_COLUMNS: &str = "transfer_id, process_id, status";

pub fn decode_transfer(row: &RowRef<'_>) -> GatewayResult<FileTransferRecord> {
    Ok(FileTransferRecord {
        id: TransferId::new(row.text("transfer_id")?),
        process_id: row.integer("process_id")?,
        status: TransferStatus::from_code(row.integer("status")?)?,
    })
}

pub fn decode_session_id(row: &RowRef<'_>) -> GatewayResult<SessionId> {
    Ok(SessionId::new(row.text("sessionid")?))
}
