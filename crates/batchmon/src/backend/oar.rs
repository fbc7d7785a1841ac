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
use crate::common::utils::format_hms;

const UNKNOWN_JOB: &[&str] = &["unknown job", "does not exist"];

pub struct OarAdapter {
    workdir: PathBuf,
}

impl OarAdapter {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

impl BackendAdapter for OarAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::Oar
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Identifier
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let arguments = build_oarsub_args(job);
        let workdir = submission_dir(job, &self.workdir);

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await?;
            let output =
                check_command_output("oarsub", output, None, &[], FailureKind::Rejected)?;
            let native_id = parse_oarsub_output(output.stdout("oarsub")?)?;
            log::debug!("OAR job {native_id} submitted");
            Ok(SubmittedJob::new(native_id))
        })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        let native_id = native_id.to_string();
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let output = run_command(to_args(&["oardel", &native_id]), &workdir).await?;
            check_command_output(
                "oardel",
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
            let native_id = expect_identifier(BackendType::Oar, query)?;
            let output =
                run_command(to_args(&["oarstat", "-s", "-j", &native_id]), &workdir).await?;
            let output = check_command_output(
                "oarstat",
                output,
                Some(&native_id),
                UNKNOWN_JOB,
                FailureKind::Unavailable,
            )?;
            parse_oarstat_output(&native_id, output.stdout("oarstat")?)
        })
    }
}

fn build_oarsub_args(job: &JobDescriptor) -> Vec<String> {
    let mut args = to_args(&["oarsub"]);
    if let Some(name) = &job.name {
        args.extend([String::from("-n"), name.clone()]);
    }
    if let Some(queue) = &job.queue {
        args.extend([String::from("-q"), queue.clone()]);
    }
    let mut resources = String::new();
    if let Some(nodes) = job.nodes {
        resources.push_str(&format!("/nodes={nodes}"));
    }
    if let Some(cpus) = job.cpus_per_node {
        resources.push_str(&format!("/core={cpus}"));
    }
    if let Some(walltime) = &job.walltime {
        if !resources.is_empty() {
            resources.push(',');
        }
        resources.push_str(&format!("walltime={}", format_hms(walltime)));
    }
    if !resources.is_empty() {
        args.extend([String::from("-l"), resources]);
    }
    if job.memory.is_some() {
        log::warn!("OAR does not support a memory request, it is ignored");
    }
    if let Some(stdout) = &job.stdout {
        args.extend([String::from("-O"), stdout.display().to_string()]);
    }
    if let Some(stderr) = &job.stderr {
        args.extend([String::from("-E"), stderr.display().to_string()]);
    }
    if let Some(work_dir) = &job.work_dir {
        args.extend([String::from("-d"), work_dir.display().to_string()]);
    }
    args.extend(job.extra_args.iter().cloned());
    args.extend([String::from("-S"), job.script.display().to_string()]);
    args
}

fn parse_oarsub_output(output: &str) -> BackendResult<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("OAR_JOB_ID="))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            BackendError::InvalidResponse(format!("Missing job id in oarsub output\n{output}"))
        })
}

/// `oarstat -s` prints `<job-id>: <state>`.
fn parse_oarstat_output(native_id: &str, output: &str) -> BackendResult<JobStatus> {
    for line in output.lines() {
        if let Some((id, state)) = line.split_once(':') {
            if id.trim() == native_id {
                return Ok(parse_oar_state(state.trim()));
            }
        }
    }
    Err(BackendError::NotFound(native_id.to_string()))
}

pub fn parse_oar_state(state: &str) -> JobStatus {
    match state {
        "Waiting" | "Hold" | "toAckReservation" | "Suspended" => JobStatus::Waiting,
        "toLaunch" => JobStatus::Queued,
        "Launching" | "Running" | "Finishing" | "Resuming" => JobStatus::Running,
        "Terminated" => JobStatus::Completed,
        "Error" | "toError" => JobStatus::Failed,
        other => unknown_state(BackendType::Oar, other),
    }
}
