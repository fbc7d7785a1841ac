use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::process::Command;

use batchcore::{BackendType, JobStatus};

use crate::backend::common::{expect_identifier, submission_dir};
use crate::backend::{
    BackendAdapter, BackendError, BackendFuture, BackendResult, JobDescriptor, QueryStyle,
    StateQuery, SubmittedJob,
};
use crate::common::process::ProcessProbe;

/// Runs the script, then records its exit code as `<state-dir>/<pid>.<token>.exit`.
/// The file is written under a temporary name and renamed, so that it is never read half-written.
const WRAPPER: &str = r#"dir="$1"; marker="$dir/$$.$2"; shift 2
if [ -x "$0" ]; then "$0" "$@"; else sh "$0" "$@"; fi
echo $? > "$marker.exit.tmp" && mv "$marker.exit.tmp" "$marker.exit""#;

const TOKEN_LEN: usize = 8;

/// Starts jobs as detached processes of the local machine.
///
/// The native identifier of a job is `<pid>.<token>`, where the token is generated for each
/// submission. Result markers carry the whole identifier, so a process that later reuses the pid
/// never sees the markers of an earlier job.
pub struct PosixAdapter {
    workdir: PathBuf,
    state_dir: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl PosixAdapter {
    pub fn new(workdir: PathBuf, state_dir: PathBuf, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            workdir,
            state_dir,
            probe,
        }
    }
}

#[derive(Debug, PartialEq)]
struct LocalJob {
    pid: i32,
    token: String,
}

impl LocalJob {
    fn parse(native_id: &str) -> BackendResult<Self> {
        let invalid =
            || BackendError::InvalidResponse(format!("Invalid local job id `{native_id}`"));
        let (pid, token) = native_id.trim().split_once('.').ok_or_else(invalid)?;
        let pid = pid
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(invalid)?;
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        Ok(Self {
            pid,
            token: token.to_string(),
        })
    }

    fn exit_file(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(format!("{}.{}.exit", self.pid, self.token))
    }

    fn cancel_file(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(format!("{}.{}.cancelled", self.pid, self.token))
    }
}

fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn open_output(path: Option<&PathBuf>) -> BackendResult<Stdio> {
    match path {
        Some(path) => std::fs::File::create(path).map(Stdio::from).map_err(|e| {
            BackendError::Rejected(format!("Cannot create output file {}: {e}", path.display()))
        }),
        None => Ok(Stdio::null()),
    }
}

/// Reads the recorded result of a job, `None` if the job has not finished yet.
fn read_recorded_status(state_dir: &Path, job: &LocalJob) -> BackendResult<Option<JobStatus>> {
    if job.cancel_file(state_dir).exists() {
        return Ok(Some(JobStatus::Cancelled));
    }
    let pid = job.pid;
    match std::fs::read_to_string(job.exit_file(state_dir)) {
        Ok(content) => {
            let code: i32 = content.trim().parse().map_err(|_| {
                BackendError::InvalidResponse(format!(
                    "Invalid exit status `{}` of process {pid}",
                    content.trim()
                ))
            })?;
            Ok(Some(if code == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            }))
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(BackendError::Unavailable(format!(
            "Cannot read exit status of process {pid}: {error}"
        ))),
    }
}

impl BackendAdapter for PosixAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::Posix
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Identifier
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let job = job.clone();
        let workdir = submission_dir(&job, &self.workdir);
        let state_dir = self.state_dir.clone();

        Box::pin(async move {
            if !job.script.is_file() {
                return Err(BackendError::Rejected(format!(
                    "Script {} does not exist",
                    job.script.display()
                )));
            }
            std::fs::create_dir_all(&state_dir).map_err(|e| {
                BackendError::Unavailable(format!(
                    "Cannot create state directory {}: {e}",
                    state_dir.display()
                ))
            })?;

            let token = generate_token();
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg(WRAPPER)
                .arg(&job.script)
                .arg(&state_dir)
                .arg(&token)
                .args(&job.extra_args)
                .current_dir(&workdir)
                .stdin(Stdio::null())
                .stdout(open_output(job.stdout.as_ref())?)
                .stderr(open_output(job.stderr.as_ref())?)
                // Own process group, so that signals sent to the monitor do not reach the job
                .process_group(0);
            log::debug!("Starting local job {}", job.script.display());
            let child = command
                .spawn()
                .map_err(|e| BackendError::Unavailable(format!("Cannot start sh: {e}")))?;
            let pid = child.id().ok_or_else(|| {
                BackendError::InvalidResponse("Started process has no pid".to_string())
            })?;
            log::debug!("Local job {} started as process {pid}", job.script.display());
            Ok(SubmittedJob::new(format!("{pid}.{token}")))
        })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        let native_id = native_id.to_string();
        let state_dir = self.state_dir.clone();
        let probe = self.probe.clone();

        Box::pin(async move {
            let local = LocalJob::parse(&native_id)?;
            let pid = local.pid;
            if read_recorded_status(&state_dir, &local)?.is_some() {
                return Err(BackendError::NotFound(native_id));
            }
            let exists = probe
                .process_exists(pid as i64)
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            if !exists {
                return Err(BackendError::NotFound(native_id));
            }
            std::fs::write(local.cancel_file(&state_dir), b"").map_err(|e| {
                BackendError::Unavailable(format!("Cannot record cancellation of {pid}: {e}"))
            })?;
            killpg(Pid::from_raw(pid), Signal::SIGTERM)
                .map_err(|e| BackendError::Unavailable(format!("Cannot kill process {pid}: {e}")))?;
            Ok(())
        })
    }

    fn query_state(&self, query: StateQuery) -> BackendFuture<JobStatus> {
        let state_dir = self.state_dir.clone();
        let probe = self.probe.clone();

        Box::pin(async move {
            let native_id = expect_identifier(BackendType::Posix, query)?;
            let local = LocalJob::parse(&native_id)?;
            let pid = local.pid;
            if let Some(status) = read_recorded_status(&state_dir, &local)? {
                return Ok(status);
            }
            let exists = probe
                .process_exists(pid as i64)
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            if exists {
                return Ok(JobStatus::Running);
            }
            // The process may have finished between the two checks
            match read_recorded_status(&state_dir, &local)? {
                Some(status) => Ok(status),
                None => {
                    log::warn!("Process {pid} ended without recording its exit status");
                    Ok(JobStatus::Failed)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{LocalJob, PosixAdapter};
    use crate::backend::{BackendAdapter, BackendError, JobDescriptor, StateQuery};
    use crate::common::process::SystemProcessProbe;
    use crate::tests::utils::FakeProbe;
    use batchcore::JobStatus;

    fn adapter(dir: &TempDir) -> PosixAdapter {
        PosixAdapter::new(
            dir.path().to_path_buf(),
            dir.path().join("state"),
            Arc::new(SystemProcessProbe),
        )
    }

    fn script(dir: &TempDir, content: &str) -> JobDescriptor {
        let path = dir.path().join("job.sh");
        std::fs::write(&path, content).unwrap();
        JobDescriptor {
            script: path,
            stdout: Some(dir.path().join("out.txt")),
            ..Default::default()
        }
    }

    async fn wait_for_terminal(adapter: &PosixAdapter, native_id: &str) -> JobStatus {
        for _ in 0..100 {
            let status = adapter
                .query_state(StateQuery::Identifier(native_id.to_string()))
                .await
                .unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("Job {native_id} did not finish");
    }

    #[tokio::test]
    async fn run_to_completion() {
        let dir = TempDir::with_prefix("batchmon").unwrap();
        let adapter = adapter(&dir);
        let job = script(&dir, "echo hello\n");
        let submitted = adapter.submit(&job).await.unwrap();
        assert!(submitted.vm_id.is_none());

        assert_eq!(
            wait_for_terminal(&adapter, &submitted.native_id).await,
            JobStatus::Completed
        );
        let output = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[tokio::test]
    async fn failing_script() {
        let dir = TempDir::with_prefix("batchmon").unwrap();
        let adapter = adapter(&dir);
        let submitted = adapter.submit(&script(&dir, "exit 3\n")).await.unwrap();
        assert_eq!(
            wait_for_terminal(&adapter, &submitted.native_id).await,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn running_and_cancelled() {
        let dir = TempDir::with_prefix("batchmon").unwrap();
        let adapter = adapter(&dir);
        let submitted = adapter.submit(&script(&dir, "sleep 30\n")).await.unwrap();
        let query = StateQuery::Identifier(submitted.native_id.clone());
        assert_eq!(
            adapter.query_state(query.clone()).await.unwrap(),
            JobStatus::Running
        );

        adapter.cancel(&submitted.native_id).await.unwrap();
        assert_eq!(adapter.query_state(query).await.unwrap(), JobStatus::Cancelled);
        assert!(matches!(
            adapter.cancel(&submitted.native_id).await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_script_is_rejected() {
        let dir = TempDir::with_prefix("batchmon").unwrap();
        let adapter = adapter(&dir);
        let job = JobDescriptor {
            script: dir.path().join("missing.sh"),
            ..Default::default()
        };
        assert!(matches!(
            adapter.submit(&job).await,
            Err(BackendError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn descriptor_query_is_refused() {
        let dir = TempDir::with_prefix("batchmon").unwrap();
        let adapter = adapter(&dir);
        assert!(matches!(
            adapter
                .query_state(StateQuery::Descriptor("{}".to_string()))
                .await,
            Err(BackendError::WrongQueryStyle { .. })
        ));
    }

    #[test]
    fn parse_local_job_id() {
        assert_eq!(
            LocalJob::parse("4242.a1B2c3D4").unwrap(),
            LocalJob {
                pid: 4242,
                token: "a1B2c3D4".to_string()
            }
        );
        for invalid in ["4242", "4242.", "-1.abc", "0.abc", "x.abc", "12.../etc"] {
            assert!(matches!(
                LocalJob::parse(invalid),
                Err(BackendError::InvalidResponse(_))
            ));
        }
    }

    #[tokio::test]
    async fn reused_pid_does_not_inherit_markers() {
        let dir = TempDir::with_prefix("batchmon").unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        let adapter = PosixAdapter::new(
            dir.path().to_path_buf(),
            state_dir.clone(),
            Arc::new(FakeProbe::alive(&[4242])),
        );
        // An earlier job with the same pid finished and was cancelled by another
        std::fs::write(state_dir.join("4242.oldjob.exit"), "0\n").unwrap();
        std::fs::write(state_dir.join("4242.other.cancelled"), "").unwrap();

        let query = |id: &str| StateQuery::Identifier(id.to_string());
        assert_eq!(
            adapter.query_state(query("4242.oldjob")).await.unwrap(),
            JobStatus::Completed
        );
        assert_eq!(
            adapter.query_state(query("4242.newjob")).await.unwrap(),
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn live_job_ignores_leftover_markers_of_its_pid() {
        let dir = TempDir::with_prefix("batchmon").unwrap();
        let adapter = adapter(&dir);
        let submitted = adapter.submit(&script(&dir, "sleep 30\n")).await.unwrap();
        let (pid, _) = submitted.native_id.split_once('.').unwrap();
        let state_dir = dir.path().join("state");
        std::fs::write(state_dir.join(format!("{pid}.exit")), "0\n").unwrap();
        std::fs::write(state_dir.join(format!("{pid}.stale.exit")), "1\n").unwrap();

        let query = StateQuery::Identifier(submitted.native_id.clone());
        assert_eq!(
            adapter.query_state(query).await.unwrap(),
            JobStatus::Running
        );
        adapter.cancel(&submitted.native_id).await.unwrap();
    }
}
