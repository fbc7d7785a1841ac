//! Submission and cancellation of jobs on behalf of a user.
use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;

use batchcore::gateway::schema::{JOB_COLUMNS, decode_job};
use batchcore::gateway::{GatewayResult, PersistenceGateway, Statement};
use batchcore::{BackendDescriptor, JobId, JobRecord, JobStatus};

use crate::backend::registry::BackendRegistry;
use crate::backend::{BackendError, JobDescriptor};
use crate::common::error::error;
use crate::monitor::update_job_status;

/// `J_<timestamp>_<random suffix>`
fn generate_job_id() -> JobId {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    JobId::new(format!("J_{}_{suffix}", Utc::now().format("%Y%m%d%H%M%S")))
}

/// Submits a job to a backend and records it as `SUBMITTED`.
pub async fn submit_job(
    gateway: &dyn PersistenceGateway,
    registry: &BackendRegistry,
    backend: &BackendDescriptor,
    owner: &str,
    machine_id: &str,
    job: &JobDescriptor,
) -> crate::Result<JobRecord> {
    let adapter = registry.resolve_descriptor(backend)?;
    let submitted = adapter.submit(job).await?;

    let mut record = JobRecord::new(
        generate_job_id(),
        submitted.native_id,
        owner.to_string(),
        machine_id.to_string(),
        backend.clone(),
    );
    record.status = JobStatus::Submitted;
    record.vm_address = submitted.vm_address;
    record.vm_id = submitted.vm_id;
    record.submit_date = Some(Utc::now());

    if let Err(insert_error) = insert_job(gateway, &record) {
        log::error!(
            "Job {} ({}) cannot be stored, cancelling it: {insert_error}",
            record.id,
            record.native_id
        );
        if let Err(cancel_error) = adapter.cancel(&record.native_id).await {
            log::error!("Cannot cancel job {}: {cancel_error}", record.native_id);
        }
        return Err(insert_error.into());
    }
    log::info!(
        "Job {} submitted to {} as {}",
        record.id,
        record.backend,
        record.native_id
    );
    Ok(record)
}

/// Cancels an active job and returns its final state.
///
/// A job that its backend does not know anymore is recorded as cancelled as well.
pub async fn cancel_job(
    gateway: &dyn PersistenceGateway,
    registry: &BackendRegistry,
    id: &JobId,
) -> crate::Result<JobStatus> {
    let Some(job) = load_job(gateway, id)? else {
        return error(format!("Job {id} does not exist"));
    };
    if job.status.is_terminal() {
        return error(format!("Job {id} has already finished ({})", job.status));
    }

    let adapter = registry.resolve_descriptor(&job.backend)?;
    match adapter.cancel(&job.native_id).await {
        Ok(()) => {}
        Err(BackendError::NotFound(_)) => {
            log::warn!(
                "Job {id} ({}) is not known to its backend anymore",
                job.native_id
            );
        }
        Err(e) => return Err(e.into()),
    }

    if update_job_status(gateway, id, JobStatus::Cancelled)? {
        log::info!("Job {id} cancelled");
        return Ok(JobStatus::Cancelled);
    }
    // The job reached a terminal state in the meantime
    let status = load_job(gateway, id)?.map_or(JobStatus::Cancelled, |job| job.status);
    log::info!("Job {id} finished as {status} before it was cancelled");
    Ok(status)
}

fn insert_job(gateway: &dyn PersistenceGateway, job: &JobRecord) -> GatewayResult<()> {
    let mut connection = gateway.acquire()?;
    connection.execute(
        &Statement::new(
            "INSERT INTO job (id, native_id, owner, submit_machine, batch_type, batch_version,
                              status, vm_address, vm_id, submit_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(job.id.as_str())
        .bind(&job.native_id)
        .bind(&job.owner)
        .bind(&job.submit_machine)
        .bind(job.backend.backend_type.code())
        .bind(&job.backend.version)
        .bind(job.status.code())
        .bind(job.vm_address.as_deref())
        .bind(job.vm_id.as_deref())
        .bind(job.submit_date),
    )?;
    Ok(())
}

fn load_job(gateway: &dyn PersistenceGateway, id: &JobId) -> GatewayResult<Option<JobRecord>> {
    let mut connection = gateway.acquire()?;
    let result = connection.query(
        &Statement::new(format!("SELECT {JOB_COLUMNS} FROM job WHERE id = ?1")).bind(id.as_str()),
    )?;
    result.row(0).map(|row| decode_job(&row)).transpose()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{cancel_job, generate_job_id, submit_job};
    use crate::backend::{BackendError, JobDescriptor, SubmittedJob};
    use crate::tests::utils::{
        FakeAdapter, JobRowBuilder, fake_registry, load_job, memory_gateway,
    };
    use batchcore::{BackendDescriptor, BackendType, JobId, JobStatus};

    #[test]
    fn job_ids_are_unique() {
        let first = generate_job_id();
        let second = generate_job_id();
        assert!(first.as_str().starts_with("J_"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn submit_records_job() {
        let gateway = memory_gateway();
        let adapter = FakeAdapter::identifier(BackendType::Slurm)
            .on_submit(|_| Ok(SubmittedJob::new("1234".to_string())));
        let backend = BackendDescriptor::new(BackendType::Slurm, "23");
        let registry = fake_registry();
        registry.register(backend.clone(), Arc::new(adapter));

        let record = submit_job(
            &*gateway,
            &registry,
            &backend,
            "alice",
            "m1",
            &JobDescriptor::default(),
        )
        .await
        .unwrap();
        assert_eq!(record.status, JobStatus::Submitted);

        let stored = load_job(&gateway, record.id.as_str());
        assert_eq!(stored.native_id, "1234");
        assert_eq!(stored.owner, "alice");
        assert_eq!(stored.submit_machine, "m1");
        assert_eq!(stored.backend, backend);
        assert_eq!(stored.status, JobStatus::Submitted);
        assert!(stored.submit_date.is_some());
    }

    #[tokio::test]
    async fn submit_cloud_job_stores_vm() {
        let gateway = memory_gateway();
        let adapter = FakeAdapter::descriptor(BackendType::OpenNebula).on_submit(|_| {
            Ok(SubmittedJob {
                native_id: "42".to_string(),
                vm_address: Some("10.0.0.5".to_string()),
                vm_id: Some("42".to_string()),
            })
        });
        let backend = BackendDescriptor::new(BackendType::OpenNebula, "");
        let registry = fake_registry();
        registry.register(backend.clone(), Arc::new(adapter));

        let record = submit_job(
            &*gateway,
            &registry,
            &backend,
            "alice",
            "m1",
            &JobDescriptor::default(),
        )
        .await
        .unwrap();
        let stored = load_job(&gateway, record.id.as_str());
        assert_eq!(stored.vm_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(stored.vm_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn rejected_submission_is_not_recorded() {
        let gateway = memory_gateway();
        let adapter = FakeAdapter::identifier(BackendType::Slurm)
            .on_submit(|_| Err(BackendError::Rejected("bad partition".to_string())));
        let backend = BackendDescriptor::new(BackendType::Slurm, "23");
        let registry = fake_registry();
        registry.register(backend.clone(), Arc::new(adapter));

        assert!(
            submit_job(
                &*gateway,
                &registry,
                &backend,
                "alice",
                "m1",
                &JobDescriptor::default()
            )
            .await
            .is_err()
        );
        assert_eq!(crate::tests::utils::job_count(&gateway), 0);
    }

    #[tokio::test]
    async fn cancel_active_job() {
        let gateway = memory_gateway();
        let adapter = Arc::new(FakeAdapter::identifier(BackendType::Slurm));
        let backend = BackendDescriptor::new(BackendType::Slurm, "23");
        let registry = fake_registry();
        registry.register(backend.clone(), adapter.clone());
        JobRowBuilder::default()
            .id("J1")
            .native_id("1234")
            .status(JobStatus::Running)
            .insert(&gateway);

        let status = cancel_job(&*gateway, &registry, &JobId::new("J1"))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(adapter.cancelled(), vec!["1234".to_string()]);
        let job = load_job(&gateway, "J1");
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.end_date.is_some());
    }

    #[tokio::test]
    async fn cancel_unknown_to_backend() {
        let gateway = memory_gateway();
        let adapter = FakeAdapter::identifier(BackendType::Slurm)
            .on_cancel(|id| Err(BackendError::NotFound(id.to_string())));
        let backend = BackendDescriptor::new(BackendType::Slurm, "23");
        let registry = fake_registry();
        registry.register(backend.clone(), Arc::new(adapter));
        JobRowBuilder::default()
            .id("J1")
            .status(JobStatus::Queued)
            .insert(&gateway);

        let status = cancel_job(&*gateway, &registry, &JobId::new("J1"))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_finished_or_missing_job() {
        let gateway = memory_gateway();
        let backend = BackendDescriptor::new(BackendType::Slurm, "23");
        let registry = fake_registry();
        registry.register(backend, Arc::new(FakeAdapter::identifier(BackendType::Slurm)));
        JobRowBuilder::default()
            .id("J1")
            .status(JobStatus::Completed)
            .insert(&gateway);

        assert!(
            cancel_job(&*gateway, &registry, &JobId::new("J1"))
                .await
                .is_err()
        );
        assert!(
            cancel_job(&*gateway, &registry, &JobId::new("J2"))
                .await
                .is_err()
        );
        assert_eq!(load_job(&gateway, "J1").status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_failure_keeps_job_active() {
        let gateway = memory_gateway();
        let adapter = FakeAdapter::identifier(BackendType::Slurm)
            .on_cancel(|_| Err(BackendError::Unavailable("scancel timed out".to_string())));
        let backend = BackendDescriptor::new(BackendType::Slurm, "23");
        let registry = fake_registry();
        registry.register(backend, Arc::new(adapter));
        JobRowBuilder::default()
            .id("J1")
            .status(JobStatus::Running)
            .insert(&gateway);

        assert!(
            cancel_job(&*gateway, &registry, &JobId::new("J1"))
                .await
                .is_err()
        );
        assert_eq!(load_job(&gateway, "J1").status, JobStatus::Running);
    }
}
