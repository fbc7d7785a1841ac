use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use bstr::ByteSlice;
use tokio::process::Command;

use batchcore::{BackendType, JobRecord, JobStatus};

use crate::backend::{BackendError, BackendResult, JobDescriptor, QueryStyle, StateQuery};

/// How a failed command is reported when it does not indicate an unknown job.
#[derive(Copy, Clone, Debug)]
pub(super) enum FailureKind {
    Unavailable,
    Rejected,
}

pub(super) struct CommandOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Checks if stdout or stderr contains any of the (case-insensitive) markers.
    pub fn mentions(&self, markers: &[&str]) -> bool {
        let stdout = self.stdout.to_str_lossy().to_lowercase();
        let stderr = self.stderr.to_str_lossy().to_lowercase();
        markers.iter().any(|marker| {
            let marker = marker.to_lowercase();
            stdout.contains(&marker) || stderr.contains(&marker)
        })
    }

    pub fn describe(&self) -> String {
        format!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            self.status.code().unwrap_or(-1),
            self.stderr.to_str_lossy().trim(),
            self.stdout.to_str_lossy().trim()
        )
    }

    pub fn stdout(&self, program: &str) -> BackendResult<&str> {
        self.stdout.to_str().map_err(|e| {
            BackendError::InvalidResponse(format!("Invalid UTF-8 in {program} output: {e:?}"))
        })
    }
}

pub(super) fn create_command(arguments: &[String], workdir: &Path) -> Command {
    let mut command = Command::new(&arguments[0]);
    command.args(&arguments[1..]);
    command.current_dir(workdir);
    command.kill_on_drop(true);
    command
}

/// Runs a backend command. Failing to start the command means that the backend is unavailable.
pub(super) async fn run_command(
    arguments: Vec<String>,
    workdir: &Path,
) -> BackendResult<CommandOutput> {
    if arguments.is_empty() {
        return Err(BackendError::Rejected("Empty command".to_string()));
    }
    log::debug!("Running command `{}`", arguments.join(" "));
    let output = create_command(&arguments, workdir)
        .output()
        .await
        .map_err(|e| BackendError::Unavailable(format!("{} start failed: {e}", arguments[0])))?;
    log::trace!(
        "{} output\nStdout\n{}Stderr\n{}",
        arguments[0],
        output.stdout.to_str_lossy(),
        output.stderr.to_str_lossy()
    );
    Ok(CommandOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Turns a failed command into the matching error.
///
/// If the output mentions one of `unknown_job_markers`, the job is reported as
/// [`BackendError::NotFound`].
pub(super) fn check_command_output(
    program: &str,
    output: CommandOutput,
    native_id: Option<&str>,
    unknown_job_markers: &[&str],
    kind: FailureKind,
) -> BackendResult<CommandOutput> {
    if output.success() {
        return Ok(output);
    }
    if let Some(native_id) = native_id {
        if output.mentions(unknown_job_markers) {
            return Err(BackendError::NotFound(native_id.to_string()));
        }
    }
    let message = format!("{program} execution failed\n{}", output.describe());
    Err(match kind {
        FailureKind::Unavailable => BackendError::Unavailable(message),
        FailureKind::Rejected => BackendError::Rejected(message),
    })
}

/// Returns the first non-empty line of a submission command output.
pub(super) fn first_line<'a>(program: &str, output: &'a str) -> BackendResult<&'a str> {
    output
        .lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .ok_or_else(|| {
            BackendError::InvalidResponse(format!("Missing job id in {program} output"))
        })
}

/// Directory in which submission commands are executed.
pub(super) fn submission_dir(job: &JobDescriptor, default: &Path) -> PathBuf {
    job.work_dir.clone().unwrap_or_else(|| default.to_path_buf())
}

pub(super) fn expect_identifier(
    backend_type: BackendType,
    query: StateQuery,
) -> BackendResult<String> {
    match query {
        StateQuery::Identifier(native_id) => Ok(native_id),
        StateQuery::Descriptor(_) => Err(BackendError::WrongQueryStyle {
            backend_type,
            expected: QueryStyle::Identifier,
        }),
    }
}

pub(super) fn expect_descriptor(
    backend_type: BackendType,
    query: StateQuery,
) -> BackendResult<JobRecord> {
    match query {
        StateQuery::Descriptor(descriptor) => JobRecord::from_descriptor(&descriptor)
            .map_err(|e| BackendError::InvalidResponse(format!("Invalid job descriptor: {e}"))),
        StateQuery::Identifier(_) => Err(BackendError::WrongQueryStyle {
            backend_type,
            expected: QueryStyle::Descriptor,
        }),
    }
}

/// States missing in the mapping table of an adapter never advance a job.
pub(super) fn unknown_state(backend_type: BackendType, state: &str) -> JobStatus {
    log::warn!("Unknown {backend_type} job state `{state}`");
    JobStatus::Undefined
}

pub(super) fn to_args(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        FailureKind, check_command_output, expect_descriptor, expect_identifier, first_line,
        run_command, to_args,
    };
    use crate::backend::{BackendError, QueryStyle, StateQuery};
    use batchcore::BackendType;

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let result = run_command(
            to_args(&["batchmon-surely-missing-program"]),
            &std::env::temp_dir(),
        )
        .await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn unknown_job_marker() {
        let output = run_command(
            to_args(&["sh", "-c", "echo 'Invalid job id specified' >&2; exit 1"]),
            &std::env::temp_dir(),
        )
        .await
        .unwrap();
        let result = check_command_output(
            "scontrol",
            output,
            Some("12"),
            &["invalid job id"],
            FailureKind::Unavailable,
        );
        assert!(matches!(result, Err(BackendError::NotFound(id)) if id == "12"));
    }

    #[tokio::test]
    async fn failure_kind() {
        let output = run_command(
            to_args(&["sh", "-c", "echo 'bad resources' >&2; exit 3"]),
            &std::env::temp_dir(),
        )
        .await
        .unwrap();
        let result = check_command_output(
            "sbatch",
            output,
            None,
            &[],
            FailureKind::Rejected,
        );
        match result {
            Err(BackendError::Rejected(message)) => {
                assert!(message.contains("Exit code: 3"));
                assert!(message.contains("bad resources"));
            }
            _ => panic!("Expected rejection"),
        }
    }

    #[tokio::test]
    async fn successful_output() {
        let output = run_command(
            to_args(&["sh", "-c", "printf '\\n  1234.server \\nnext\\n'"]),
            &std::env::temp_dir(),
        )
        .await
        .unwrap();
        let output =
            check_command_output("qsub", output, None, &[], FailureKind::Rejected).unwrap();
        assert_eq!(first_line("qsub", output.stdout("qsub").unwrap()).unwrap(), "1234.server");
    }

    #[test]
    fn wrong_query_style() {
        let result = expect_identifier(
            BackendType::Slurm,
            StateQuery::Descriptor("{}".to_string()),
        );
        assert!(matches!(
            result,
            Err(BackendError::WrongQueryStyle {
                expected: QueryStyle::Identifier,
                ..
            })
        ));
        let result = expect_descriptor(
            BackendType::OpenNebula,
            StateQuery::Identifier("1".to_string()),
        );
        assert!(matches!(
            result,
            Err(BackendError::WrongQueryStyle {
                expected: QueryStyle::Descriptor,
                ..
            })
        ));
    }

    #[test]
    fn malformed_descriptor() {
        let result = expect_descriptor(
            BackendType::OpenNebula,
            StateQuery::Descriptor("not json".to_string()),
        );
        assert!(matches!(result, Err(BackendError::InvalidResponse(_))));
    }

    #[test]
    fn empty_output_has_no_id() {
        assert!(first_line("qsub", "\n  \n").is_err());
    }
}
