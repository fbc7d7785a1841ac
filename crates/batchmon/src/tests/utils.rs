use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use derive_builder::Builder;
use log::LevelFilter;

use batchcore::gateway::schema::{JOB_COLUMNS, decode_job};
use batchcore::gateway::{
    GatewayConnection, GatewayError, GatewayResult, PersistenceGateway, SqliteGateway, Statement,
};
use batchcore::{
    BackendDescriptor, BackendType, JobRecord, JobStatus, SessionId, SessionState, Set,
    TransferStatus,
};

use crate::backend::registry::{BackendRegistry, BackendSettings, CloudSettings};
use crate::backend::{
    BackendAdapter, BackendFuture, BackendResult, JobDescriptor, QueryStyle, StateQuery,
    SubmittedJob,
};
use crate::common::process::{ProcessProbe, SystemProcessProbe};
use crate::monitor::Monitor;
use crate::monitor::config::{MonitorConfig, Subsystems};
use crate::session::{GatewaySessionCloser, SessionCloser, SessionError};

pub fn init_test_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// Descriptor with every optional field filled in.
pub fn full_job_descriptor() -> JobDescriptor {
    JobDescriptor {
        script: PathBuf::from("/home/alice/job.sh"),
        name: Some("sim".to_string()),
        queue: Some("short".to_string()),
        walltime: Some(Duration::from_secs(90 * 60)),
        nodes: Some(2),
        cpus_per_node: Some(16),
        memory: Some(2048),
        stdout: Some(PathBuf::from("/home/alice/out.txt")),
        stderr: Some(PathBuf::from("/home/alice/err.txt")),
        work_dir: Some(PathBuf::from("/home/alice")),
        extra_args: vec!["--exclusive".to_string()],
    }
}

// Database

pub fn memory_gateway() -> Arc<dyn PersistenceGateway> {
    let gateway = SqliteGateway::in_memory().unwrap();
    gateway.create_schema().unwrap();
    Arc::new(gateway)
}

/// Gateway whose store is never reachable.
pub struct UnreachableGateway;

impl PersistenceGateway for UnreachableGateway {
    fn acquire(&self) -> GatewayResult<Box<dyn GatewayConnection + '_>> {
        Err(GatewayError::Connection("database is down".to_string()))
    }
}

pub fn register_instance(gateway: &dyn PersistenceGateway, instance_id: &str) {
    gateway
        .acquire()
        .unwrap()
        .execute(
            &Statement::new("INSERT INTO vishnu (vishnuid, created_at) VALUES (?1, ?2)")
                .bind(instance_id)
                .bind(Utc::now()),
        )
        .unwrap();
}

pub fn insert_session(
    gateway: &dyn PersistenceGateway,
    id: &str,
    last_access: DateTime<Utc>,
    timeout_secs: i64,
    state: SessionState,
) {
    gateway
        .acquire()
        .unwrap()
        .execute(
            &Statement::new(
                "INSERT INTO vsession (sessionid, last_access, timeout, state)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(id)
            .bind(last_access)
            .bind(timeout_secs)
            .bind(state.code()),
        )
        .unwrap();
}

pub fn insert_transfer(
    gateway: &dyn PersistenceGateway,
    id: &str,
    process_id: i64,
    status: TransferStatus,
) {
    gateway
        .acquire()
        .unwrap()
        .execute(
            &Statement::new(
                "INSERT INTO filetransfer (transfer_id, process_id, status) VALUES (?1, ?2, ?3)",
            )
            .bind(id)
            .bind(process_id)
            .bind(status.code()),
        )
        .unwrap();
}

pub fn transfer_status(gateway: &dyn PersistenceGateway, id: &str) -> TransferStatus {
    let result = gateway
        .acquire()
        .unwrap()
        .query(
            &Statement::new("SELECT status FROM filetransfer WHERE transfer_id = ?1").bind(id),
        )
        .unwrap();
    TransferStatus::from_code(result.row(0).unwrap().integer("status").unwrap()).unwrap()
}

pub fn load_job(gateway: &dyn PersistenceGateway, id: &str) -> JobRecord {
    let result = gateway
        .acquire()
        .unwrap()
        .query(&Statement::new(format!("SELECT {JOB_COLUMNS} FROM job WHERE id = ?1")).bind(id))
        .unwrap();
    decode_job(&result.row(0).unwrap()).unwrap()
}

pub fn job_count(gateway: &dyn PersistenceGateway) -> i64 {
    let result = gateway
        .acquire()
        .unwrap()
        .query(&Statement::new("SELECT COUNT(*) AS count FROM job"))
        .unwrap();
    result.row(0).unwrap().integer("count").unwrap()
}

/// A row of the job table.
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct JobRow {
    #[builder(setter(into))]
    id: String,
    #[builder(setter(into), default = "\"1\".to_string()")]
    native_id: String,
    #[builder(setter(into), default = "\"alice\".to_string()")]
    owner: String,
    #[builder(setter(into), default = "\"m1\".to_string()")]
    submit_machine: String,
    #[builder(default = "BackendType::Slurm")]
    backend_type: BackendType,
    #[builder(setter(into), default = "\"23\".to_string()")]
    version: String,
    #[builder(default = "JobStatus::Undefined")]
    status: JobStatus,
    #[builder(setter(into, strip_option), default)]
    vm_id: Option<String>,
    #[builder(default = "Utc.timestamp_opt(1_700_000_000, 0).unwrap()")]
    submit_date: DateTime<Utc>,
}

impl JobRowBuilder {
    pub fn insert(self, gateway: &dyn PersistenceGateway) {
        let row = self.finish().unwrap();
        gateway
            .acquire()
            .unwrap()
            .execute(
                &Statement::new(
                    "INSERT INTO job (id, native_id, owner, submit_machine, batch_type,
                                      batch_version, status, vm_id, submit_date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .bind(row.id)
                .bind(row.native_id)
                .bind(row.owner)
                .bind(row.submit_machine)
                .bind(row.backend_type.code())
                .bind(row.version)
                .bind(row.status.code())
                .bind(row.vm_id)
                .bind(row.submit_date),
            )
            .unwrap();
    }
}

// Backends

type SubmitFn = dyn Fn(&JobDescriptor) -> BackendResult<SubmittedJob> + Send + Sync;
type CancelFn = dyn Fn(&str) -> BackendResult<()> + Send + Sync;
type QueryFn = dyn Fn(&StateQuery) -> BackendResult<JobStatus> + Send + Sync;

/// Adapter whose behavior is given by closures. It remembers the queries and cancellations it
/// received.
pub struct FakeAdapter {
    backend_type: BackendType,
    query_style: QueryStyle,
    submit_fn: Box<SubmitFn>,
    cancel_fn: Box<CancelFn>,
    query_fn: Box<QueryFn>,
    query_delay: Option<Duration>,
    queries: Mutex<Vec<StateQuery>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeAdapter {
    fn new(backend_type: BackendType, query_style: QueryStyle) -> Self {
        Self {
            backend_type,
            query_style,
            submit_fn: Box::new(|_| Ok(SubmittedJob::new("1".to_string()))),
            cancel_fn: Box::new(|_| Ok(())),
            query_fn: Box::new(|_| Ok(JobStatus::Running)),
            query_delay: None,
            queries: Default::default(),
            cancelled: Default::default(),
        }
    }

    pub fn identifier(backend_type: BackendType) -> Self {
        Self::new(backend_type, QueryStyle::Identifier)
    }

    pub fn descriptor(backend_type: BackendType) -> Self {
        Self::new(backend_type, QueryStyle::Descriptor)
    }

    pub fn on_submit<F>(mut self, f: F) -> Self
    where
        F: Fn(&JobDescriptor) -> BackendResult<SubmittedJob> + Send + Sync + 'static,
    {
        self.submit_fn = Box::new(f);
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> BackendResult<()> + Send + Sync + 'static,
    {
        self.cancel_fn = Box::new(f);
        self
    }

    pub fn on_query<F>(mut self, f: F) -> Self
    where
        F: Fn(&StateQuery) -> BackendResult<JobStatus> + Send + Sync + 'static,
    {
        self.query_fn = Box::new(f);
        self
    }

    /// Every state query takes at least this long.
    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<StateQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl BackendAdapter for FakeAdapter {
    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn query_style(&self) -> QueryStyle {
        self.query_style
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let result = (self.submit_fn)(job);
        Box::pin(async move { result })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        self.cancelled.lock().unwrap().push(native_id.to_string());
        let result = (self.cancel_fn)(native_id);
        Box::pin(async move { result })
    }

    fn query_state(&self, query: StateQuery) -> BackendFuture<JobStatus> {
        let result = (self.query_fn)(&query);
        self.queries.lock().unwrap().push(query);
        let delay = self.query_delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

/// Registry without any registered adapter, built-in adapters work in the temporary directory.
pub fn fake_registry() -> BackendRegistry {
    BackendRegistry::new(
        BackendSettings {
            work_dir: std::env::temp_dir(),
            posix_state_dir: std::env::temp_dir().join("batchmon-test-posix"),
            cloud: CloudSettings::default(),
        },
        Arc::new(SystemProcessProbe),
    )
}

// Collaborators

/// Processes that exist are listed explicitly.
#[derive(Default)]
pub struct FakeProbe {
    alive: Mutex<Set<i64>>,
}

impl FakeProbe {
    pub fn alive(pids: &[i64]) -> Self {
        Self {
            alive: Mutex::new(pids.iter().copied().collect()),
        }
    }

    pub fn kill(&self, pid: i64) {
        self.alive.lock().unwrap().remove(&pid);
    }
}

impl ProcessProbe for FakeProbe {
    fn process_exists(&self, pid: i64) -> std::io::Result<bool> {
        if pid <= 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid process id {pid}"),
            ));
        }
        Ok(self.alive.lock().unwrap().contains(&pid))
    }
}

type SessionFailure = dyn Fn() -> SessionError + Send + Sync;

/// Session closer with a fixed list of expired sessions.
pub struct FakeSessionCloser {
    expired: Vec<SessionId>,
    failures: Vec<(SessionId, Box<SessionFailure>)>,
    closed: Mutex<Vec<SessionId>>,
}

impl FakeSessionCloser {
    pub fn new(expired: Vec<&str>) -> Self {
        Self {
            expired: expired.into_iter().map(SessionId::new).collect(),
            failures: vec![],
            closed: Default::default(),
        }
    }

    pub fn fail_on<F>(mut self, id: &str, failure: F) -> Self
    where
        F: Fn() -> SessionError + Send + Sync + 'static,
    {
        self.failures.push((SessionId::new(id), Box::new(failure)));
        self
    }

    pub fn closed(&self) -> Vec<SessionId> {
        self.closed.lock().unwrap().clone()
    }
}

impl SessionCloser for FakeSessionCloser {
    fn list_expired_sessions(&self, _now: DateTime<Utc>) -> Result<Vec<SessionId>, SessionError> {
        let closed = self.closed.lock().unwrap();
        Ok(self
            .expired
            .iter()
            .filter(|id| !closed.contains(*id))
            .cloned()
            .collect())
    }

    fn close_session(&self, id: &SessionId) -> Result<(), SessionError> {
        if let Some((_, failure)) = self.failures.iter().find(|(failing, _)| failing == id) {
            return Err(failure());
        }
        self.closed.lock().unwrap().push(id.clone());
        Ok(())
    }
}

// Monitor

/// Monitor of the instance `vishnu_1` running on the machine `m1`.
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct TestMonitor {
    #[builder(default = "BackendDescriptor::new(BackendType::Posix, \"\")")]
    backend: BackendDescriptor,
    #[builder(default)]
    subsystems: Subsystems,
    #[builder(default = "Duration::from_secs(5)")]
    backend_timeout: Duration,
    #[builder(default = "Duration::from_secs(3600)")]
    interval: Duration,
    #[builder(setter(strip_option), default)]
    sessions: Option<Arc<dyn SessionCloser>>,
}

impl TestMonitorBuilder {
    pub fn build(
        self,
        gateway: Arc<dyn PersistenceGateway>,
        registry: Arc<BackendRegistry>,
        probe: Arc<dyn ProcessProbe>,
    ) -> Monitor {
        let TestMonitor {
            backend,
            subsystems,
            backend_timeout,
            interval,
            sessions,
        } = self.finish().unwrap();
        let sessions: Arc<dyn SessionCloser> = match sessions {
            Some(sessions) => sessions,
            None => Arc::new(GatewaySessionCloser::new(gateway.clone())),
        };
        Monitor::new(
            MonitorConfig::new(
                "vishnu_1".to_string(),
                "m1".to_string(),
                backend,
                subsystems,
                Some(interval),
                Some(backend_timeout),
                Some(4),
            ),
            gateway,
            registry,
            sessions,
            probe,
        )
    }
}
