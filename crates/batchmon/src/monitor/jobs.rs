use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;

use batchcore::gateway::schema::{JOB_COLUMNS, decode_job};
use batchcore::gateway::{GatewayResult, PersistenceGateway, Statement};
use batchcore::{BackendType, JobId, JobRecord, JobStatus};

use crate::backend::registry::BackendRegistry;
use crate::backend::{BackendError, BackendResult, StateQuery};
use crate::monitor::{CycleReport, Monitor, MonitorError, escalate};

pub(super) async fn check_jobs(
    monitor: &Monitor,
    report: &mut CycleReport,
) -> Result<(), MonitorError> {
    let primary = monitor.config.backend.backend_type;
    check_backend_jobs(monitor, primary, report).await?;
    // Jobs can be forked locally regardless of the default backend of the machine
    if primary != BackendType::Posix {
        check_backend_jobs(monitor, BackendType::Posix, report).await?;
    }
    Ok(())
}

async fn check_backend_jobs(
    monitor: &Monitor,
    backend_type: BackendType,
    report: &mut CycleReport,
) -> Result<(), MonitorError> {
    let jobs = match load_candidates(
        monitor.gateway.as_ref(),
        &monitor.config.machine_id,
        backend_type,
    ) {
        Ok(jobs) => jobs,
        Err(error) => {
            let error = escalate(error)?;
            log::error!("Cannot load active {backend_type} jobs: {error}");
            return Ok(());
        }
    };
    if jobs.is_empty() {
        return Ok(());
    }
    log::debug!("Checking {} active {backend_type} job(s)", jobs.len());

    let registry = monitor.registry.as_ref();
    let timeout = monitor.config.backend_timeout;
    let mut results = futures::stream::iter(jobs)
        .map(|job| async move {
            let result = query_job(registry, &job, timeout).await;
            (job, result)
        })
        .buffer_unordered(monitor.config.max_parallel_queries);

    while let Some((job, result)) = results.next().await {
        report.jobs_checked += 1;
        let reported = match result {
            Ok(status) => status,
            Err(BackendError::NotFound(_)) => {
                log::debug!(
                    "Job {} ({}) is not known to its backend anymore, marking it as completed",
                    job.id,
                    job.native_id
                );
                JobStatus::Completed
            }
            Err(error @ BackendError::WrongQueryStyle { .. }) => {
                log::error!("Job {} was queried in a wrong way, this is a bug: {error}", job.id);
                report.jobs_failed += 1;
                continue;
            }
            Err(error) => {
                log::error!(
                    "Cannot get state of job {} ({}): {error}",
                    job.id,
                    job.native_id
                );
                report.jobs_failed += 1;
                continue;
            }
        };

        let status = job.status.advance(reported);
        if status == job.status {
            continue;
        }
        match update_job_status(monitor.gateway.as_ref(), &job.id, status) {
            Ok(true) => {
                log::debug!("Job {} changed state {} -> {status}", job.id, job.status);
                report.jobs_updated += 1;
            }
            Ok(false) => {
                log::debug!("Job {} was changed concurrently, {status} not stored", job.id);
            }
            Err(error) => {
                let error = escalate(error)?;
                log::error!("Cannot store state {status} of job {}: {error}", job.id);
                report.jobs_failed += 1;
            }
        }
    }
    Ok(())
}

async fn query_job(
    registry: &BackendRegistry,
    job: &JobRecord,
    timeout: Duration,
) -> BackendResult<JobStatus> {
    let adapter = registry.resolve_descriptor(&job.backend)?;
    let query = StateQuery::for_job(job, adapter.query_style())
        .map_err(|e| BackendError::InvalidResponse(format!("Cannot serialize job: {e}")))?;
    tokio::time::timeout(timeout, adapter.query_state(query))
        .await
        .map_err(|_| BackendError::Timeout(timeout))?
}

/// Active jobs of one backend that were submitted from the given machine.
fn load_candidates(
    gateway: &dyn PersistenceGateway,
    machine_id: &str,
    backend_type: BackendType,
) -> GatewayResult<Vec<JobRecord>> {
    let mut connection = gateway.acquire()?;
    let result = connection.query(
        &Statement::new(format!(
            "SELECT {JOB_COLUMNS} FROM job
             WHERE submit_machine = ?1 AND batch_type = ?2 AND status >= ?3 AND status < ?4
             ORDER BY submit_date, id"
        ))
        .bind(machine_id)
        .bind(backend_type.code())
        .bind(JobStatus::Undefined.code())
        .bind(JobStatus::Completed.code()),
    )?;

    let mut jobs = Vec::with_capacity(result.row_count());
    for row in result.rows() {
        match decode_job(&row) {
            Ok(job) => jobs.push(job),
            Err(error) => {
                let id = row.opt_text("id").ok().flatten().unwrap_or("<unknown>");
                log::error!("Skipping job {id}: {error}");
            }
        }
    }
    Ok(jobs)
}

/// Stores a new state of a job with a single statement.
///
/// The state of a job only moves forward and a terminal state is never left. Entering `RUNNING`
/// stamps the start date, entering a terminal state stamps the end date; both only if they are not
/// set yet. Returns `false` if the stored state did not allow the change.
pub(crate) fn update_job_status(
    gateway: &dyn PersistenceGateway,
    id: &JobId,
    status: JobStatus,
) -> GatewayResult<bool> {
    let mut sql = String::from("UPDATE job SET status = ?1");
    if status == JobStatus::Running {
        sql.push_str(", start_date = COALESCE(start_date, ?2)");
    }
    if status.is_terminal() {
        sql.push_str(", end_date = COALESCE(end_date, ?2)");
    }
    sql.push_str(" WHERE id = ?3 AND status <= ?1 AND status < ?4");

    let mut connection = gateway.acquire()?;
    let updated = connection.execute(
        &Statement::new(sql)
            .bind(status.code())
            .bind(Utc::now())
            .bind(id.as_str())
            .bind(JobStatus::Completed.code()),
    )?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::{load_candidates, update_job_status};
    use crate::tests::utils::{JobRowBuilder, load_job, memory_gateway};
    use batchcore::{BackendType, JobId, JobStatus};

    #[test]
    fn status_only_moves_forward() {
        let gateway = memory_gateway();
        JobRowBuilder::default()
            .id("J1")
            .status(JobStatus::Running)
            .insert(&gateway);
        let id = JobId::new("J1");

        assert!(!update_job_status(&*gateway, &id, JobStatus::Queued).unwrap());
        assert_eq!(load_job(&gateway, "J1").status, JobStatus::Running);

        assert!(update_job_status(&*gateway, &id, JobStatus::Completed).unwrap());
        let job = load_job(&gateway, "J1");
        assert_eq!(job.status, JobStatus::Completed);
        let end_date = job.end_date.unwrap();

        // Terminal states are final
        assert!(!update_job_status(&*gateway, &id, JobStatus::Failed).unwrap());
        let job = load_job(&gateway, "J1");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.end_date, Some(end_date));
    }

    #[test]
    fn running_stamps_start_date() {
        let gateway = memory_gateway();
        JobRowBuilder::default()
            .id("J1")
            .status(JobStatus::Queued)
            .insert(&gateway);
        let id = JobId::new("J1");

        assert!(update_job_status(&*gateway, &id, JobStatus::Running).unwrap());
        let job = load_job(&gateway, "J1");
        assert!(job.start_date.is_some());
        assert!(job.end_date.is_none());
    }

    #[test]
    fn candidates_are_scoped() {
        let gateway = memory_gateway();
        for (id, machine, backend_type, status) in [
            ("J1", "m1", BackendType::Slurm, JobStatus::Running),
            ("J2", "m1", BackendType::Slurm, JobStatus::Completed),
            ("J3", "m2", BackendType::Slurm, JobStatus::Running),
            ("J4", "m1", BackendType::Posix, JobStatus::Undefined),
            ("J5", "m1", BackendType::Slurm, JobStatus::Undefined),
        ] {
            JobRowBuilder::default()
                .id(id)
                .submit_machine(machine)
                .backend_type(backend_type)
                .status(status)
                .insert(&gateway);
        }
        let ids = |backend_type| {
            load_candidates(&*gateway, "m1", backend_type)
                .unwrap()
                .into_iter()
                .map(|job| job.id.as_str().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(BackendType::Slurm), vec!["J1", "J5"]);
        assert_eq!(ids(BackendType::Posix), vec!["J4"]);
    }
}
