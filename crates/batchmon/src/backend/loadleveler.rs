use std::path::PathBuf;

use batchcore::{BackendType, JobStatus};

use crate::backend::common::{
    FailureKind, check_command_output, expect_identifier, run_command, submission_dir, to_args,
    unknown_state,
};
use crate::backend::{
    BackendAdapter, BackendError, BackendFuture, BackendResult, JobDescriptor, QueryStyle,
    StateQuery, SubmittedJob,
};

const UNKNOWN_JOB: &[&str] = &["no job status to report", "not found"];

pub struct LoadLevelerAdapter {
    workdir: PathBuf,
}

impl LoadLevelerAdapter {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

impl BackendAdapter for LoadLevelerAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::LoadLeveler
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Identifier
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        // llsubmit reads resources only from the job command file
        if job.walltime.is_some() || job.nodes.is_some() || job.memory.is_some() {
            log::warn!(
                "LoadLeveler takes resource requests only from the script {}",
                job.script.display()
            );
        }
        let mut arguments = to_args(&["llsubmit"]);
        arguments.extend(job.extra_args.iter().cloned());
        arguments.push(job.script.display().to_string());
        let workdir = submission_dir(job, &self.workdir);

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await?;
            let output =
                check_command_output("llsubmit", output, None, &[], FailureKind::Rejected)?;
            let native_id = parse_llsubmit_output(output.stdout("llsubmit")?)?;
            log::debug!("LoadLeveler job {native_id} submitted");
            Ok(SubmittedJob::new(native_id))
        })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        let native_id = native_id.to_string();
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let output = run_command(to_args(&["llcancel", &native_id]), &workdir).await?;
            check_command_output(
                "llcancel",
                output,
                Some(&native_id),
                UNKNOWN_JOB,
                FailureKind::Unavailable,
            )?;
            Ok(())
        })
    }

    fn query_state(&self, query: StateQuery) -> BackendFuture<JobStatus> {
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let native_id = expect_identifier(BackendType::LoadLeveler, query)?;
            let output =
                run_command(to_args(&["llq", "-f", "%st", &native_id]), &workdir).await?;
            let output = check_command_output(
                "llq",
                output,
                Some(&native_id),
                UNKNOWN_JOB,
                FailureKind::Unavailable,
            )?;
            if output.mentions(UNKNOWN_JOB) {
                return Err(BackendError::NotFound(native_id));
            }
            parse_llq_output(&native_id, output.stdout("llq")?)
        })
    }
}

/// `llsubmit: The job "node1.domain.123" has been submitted.`
fn parse_llsubmit_output(output: &str) -> BackendResult<String> {
    output
        .lines()
        .find(|line| line.contains("has been submitted"))
        .and_then(|line| line.split('"').nth(1))
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .ok_or_else(|| {
            BackendError::InvalidResponse(format!("Missing job id in llsubmit output\n{output}"))
        })
}

/// The output of `llq -f %st` is a header, a separator line and one state per job step.
fn parse_llq_output(native_id: &str, output: &str) -> BackendResult<JobStatus> {
    let state = output
        .lines()
        .map(|line| line.trim())
        .skip_while(|line| !line.starts_with("--"))
        .nth(1)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| {
            BackendError::InvalidResponse(format!("Missing state of job {native_id} in llq output"))
        })?;
    Ok(parse_loadleveler_state(state))
}

pub fn parse_loadleveler_state(state: &str) -> JobStatus {
    match state {
        "I" | "NQ" | "D" => JobStatus::Queued,
        "P" | "H" | "S" | "HS" | "V" | "VP" | "E" | "EP" | "MP" => JobStatus::Waiting,
        "R" | "ST" | "CK" | "CP" => JobStatus::Running,
        "C" => JobStatus::Completed,
        "CA" | "RM" | "RP" => JobStatus::Cancelled,
        "NR" | "SX" | "TX" | "X" | "XP" => JobStatus::Failed,
        other => unknown_state(BackendType::LoadLeveler, other),
    }
}
