//! Adapters that translate the native job-control interface of a scheduler or cloud provider into
//! the canonical job model.
mod common;
pub mod cloud;
pub mod loadleveler;
pub mod lsf;
pub mod oar;
pub mod pbs;
pub mod posix;
pub mod registry;
pub mod sge;
pub mod slurm;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use batchcore::{BackendType, JobRecord, JobStatus};

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend does not track the job (anymore).
    #[error("Job {0} is not known to the backend")]
    NotFound(String),
    #[error("Backend is unavailable: {0}")]
    Unavailable(String),
    #[error("Backend rejected the request: {0}")]
    Rejected(String),
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("Backend {backend_type} requires a {expected} state query")]
    WrongQueryStyle {
        backend_type: BackendType,
        expected: QueryStyle,
    },
    #[error("Unsupported backend {backend_type} (version `{version}`)")]
    UnsupportedBackend {
        backend_type: BackendType,
        version: String,
    },
    #[error("Backend did not answer in {0:?}")]
    Timeout(Duration),
}

pub type BackendResult<T> = Result<T, BackendError>;

pub type BackendFuture<T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send>>;

/// What an adapter needs to answer a state query.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum QueryStyle {
    /// The backend-native identifier is enough.
    Identifier,
    /// The serialized job record is required.
    Descriptor,
}

impl Display for QueryStyle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryStyle::Identifier => f.write_str("identifier"),
            QueryStyle::Descriptor => f.write_str("descriptor"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StateQuery {
    Identifier(String),
    /// JSON serialized [`JobRecord`].
    Descriptor(String),
}

impl StateQuery {
    pub fn for_job(job: &JobRecord, style: QueryStyle) -> serde_json::Result<Self> {
        Ok(match style {
            QueryStyle::Identifier => StateQuery::Identifier(job.native_id.clone()),
            QueryStyle::Descriptor => StateQuery::Descriptor(job.to_descriptor()?),
        })
    }

    pub fn style(&self) -> QueryStyle {
        match self {
            StateQuery::Identifier(_) => QueryStyle::Identifier,
            StateQuery::Descriptor(_) => QueryStyle::Descriptor,
        }
    }
}

/// Resources and placement of a job that is being submitted.
///
/// The job script is passed to the backend untouched, every field is translated into an option of
/// the submission command.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub script: PathBuf,
    pub name: Option<String>,
    pub queue: Option<String>,
    pub walltime: Option<Duration>,
    pub nodes: Option<u32>,
    pub cpus_per_node: Option<u32>,
    /// MiB
    pub memory: Option<u64>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubmittedJob {
    pub native_id: String,
    pub vm_address: Option<String>,
    pub vm_id: Option<String>,
}

impl SubmittedJob {
    pub fn new(native_id: String) -> Self {
        Self {
            native_id,
            vm_address: None,
            vm_id: None,
        }
    }
}

/// Job-control interface of one backend.
///
/// Adapters are stateless with respect to individual jobs and may be shared between tasks.
pub trait BackendAdapter: Send + Sync {
    fn backend_type(&self) -> BackendType;

    fn query_style(&self) -> QueryStyle;

    /// Submits a job and returns its backend-native identifier.
    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob>;

    /// Cancels a job. Returns [`BackendError::NotFound`] if the backend no longer knows it.
    fn cancel(&self, native_id: &str) -> BackendFuture<()>;

    /// Returns the canonical state of a job.
    ///
    /// A query of the wrong style fails with [`BackendError::WrongQueryStyle`].
    fn query_state(&self, query: StateQuery) -> BackendFuture<JobStatus>;
}

#[cfg(test)]
mod tests {
    use super::{QueryStyle, StateQuery};
    use batchcore::{BackendDescriptor, BackendType, JobId, JobRecord};

    #[test]
    fn state_query_for_job() {
        let job = JobRecord::new(
            JobId::new("J1"),
            "42".to_string(),
            "alice".to_string(),
            "m1".to_string(),
            BackendDescriptor::new(BackendType::Slurm, "23"),
        );
        assert_eq!(
            StateQuery::for_job(&job, QueryStyle::Identifier).unwrap(),
            StateQuery::Identifier("42".to_string())
        );
        let query = StateQuery::for_job(&job, QueryStyle::Descriptor).unwrap();
        assert_eq!(query.style(), QueryStyle::Descriptor);
        match query {
            StateQuery::Descriptor(descriptor) => {
                assert_eq!(JobRecord::from_descriptor(&descriptor).unwrap(), job)
            }
            StateQuery::Identifier(_) => unreachable!(),
        }
    }
}
