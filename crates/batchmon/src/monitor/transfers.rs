use batchcore::gateway::schema::{TRANSFER_COLUMNS, decode_transfer};
use batchcore::gateway::{GatewayResult, PersistenceGateway, Statement};
use batchcore::{FileTransferRecord, TransferId, TransferStatus};

use crate::common::process::ProcessProbe;
use crate::monitor::{CycleReport, MonitorError, escalate};

/// Marks transfers whose process has disappeared as interrupted.
pub(super) fn check_transfers(
    gateway: &dyn PersistenceGateway,
    probe: &dyn ProcessProbe,
    report: &mut CycleReport,
) -> Result<(), MonitorError> {
    let transfers = match load_in_progress(gateway) {
        Ok(transfers) => transfers,
        Err(error) => {
            let error = escalate(error)?;
            log::error!("Cannot load file transfers in progress: {error}");
            return Ok(());
        }
    };

    for transfer in transfers {
        report.transfers_checked += 1;
        match probe.process_exists(transfer.process_id) {
            Ok(true) => {}
            Ok(false) => match mark_interrupted(gateway, &transfer.id) {
                Ok(true) => {
                    log::info!(
                        "File transfer {} interrupted, its process {} does not exist",
                        transfer.id,
                        transfer.process_id
                    );
                    report.transfers_interrupted += 1;
                }
                Ok(false) => {}
                Err(error) => {
                    let error = escalate(error)?;
                    log::error!("Cannot update file transfer {}: {error}", transfer.id);
                    report.transfers_failed += 1;
                }
            },
            Err(error) => {
                log::error!(
                    "Cannot check process {} of file transfer {}: {error}",
                    transfer.process_id,
                    transfer.id
                );
                report.transfers_failed += 1;
            }
        }
    }
    Ok(())
}

fn load_in_progress(gateway: &dyn PersistenceGateway) -> GatewayResult<Vec<FileTransferRecord>> {
    let mut connection = gateway.acquire()?;
    let result = connection.query(
        &Statement::new(format!(
            "SELECT {TRANSFER_COLUMNS} FROM filetransfer WHERE status = ?1 ORDER BY transfer_id"
        ))
        .bind(TransferStatus::InProgress.code()),
    )?;

    let mut transfers = Vec::with_capacity(result.row_count());
    for row in result.rows() {
        match decode_transfer(&row) {
            Ok(transfer) => transfers.push(transfer),
            Err(error) => {
                let id = row
                    .opt_text("transfer_id")
                    .ok()
                    .flatten()
                    .unwrap_or("<unknown>");
                log::error!("Skipping file transfer {id}: {error}");
            }
        }
    }
    Ok(transfers)
}

fn mark_interrupted(gateway: &dyn PersistenceGateway, id: &TransferId) -> GatewayResult<bool> {
    let mut connection = gateway.acquire()?;
    let updated = connection.execute(
        &Statement::new(
            "UPDATE filetransfer SET status = ?1 WHERE transfer_id = ?2 AND status = ?3",
        )
        .bind(TransferStatus::Interrupted.code())
        .bind(id.as_str())
        .bind(TransferStatus::InProgress.code()),
    )?;
    Ok(updated > 0)
}
