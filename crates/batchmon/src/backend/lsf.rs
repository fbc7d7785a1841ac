use std::path::PathBuf;

use batchcore::{BackendType, JobStatus};

use crate::backend::common::{
    FailureKind, check_command_output, expect_identifier, first_line, run_command,
    submission_dir, to_args, unknown_state,
};
use crate::backend::{
    BackendAdapter, BackendError, BackendFuture, BackendResult, JobDescriptor, QueryStyle,
    StateQuery, SubmittedJob,
};

const UNKNOWN_JOB: &[&str] = &["is not found", "no matching job"];

pub struct LsfAdapter {
    workdir: PathBuf,
}

impl LsfAdapter {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

impl BackendAdapter for LsfAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::Lsf
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Identifier
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let arguments = build_bsub_args(job);
        let workdir = submission_dir(job, &self.workdir);

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await?;
            let output = check_command_output("bsub", output, None, &[], FailureKind::Rejected)?;
            let native_id = parse_bsub_output(output.stdout("bsub")?)?;
            log::debug!("LSF job {native_id} submitted");
            Ok(SubmittedJob::new(native_id))
        })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        let native_id = native_id.to_string();
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let output = run_command(to_args(&["bkill", &native_id]), &workdir).await?;
            let output = check_command_output(
                "bkill",
                output,
                Some(&native_id),
                UNKNOWN_JOB,
                FailureKind::Unavailable,
            )?;
            if output.mentions(UNKNOWN_JOB) {
                return Err(BackendError::NotFound(native_id));
            }
            Ok(())
        })
    }

    fn query_state(&self, query: StateQuery) -> BackendFuture<JobStatus> {
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let native_id = expect_identifier(BackendType::Lsf, query)?;
            let output = run_command(
                to_args(&["bjobs", "-noheader", "-o", "stat", &native_id]),
                &workdir,
            )
            .await?;
            let output = check_command_output(
                "bjobs",
                output,
                Some(&native_id),
                UNKNOWN_JOB,
                FailureKind::Unavailable,
            )?;
            // bjobs may report an unknown job with a zero exit code
            if output.mentions(UNKNOWN_JOB) {
                return Err(BackendError::NotFound(native_id));
            }
            let state = first_line("bjobs", output.stdout("bjobs")?)?;
            Ok(parse_lsf_state(state))
        })
    }
}

fn build_bsub_args(job: &JobDescriptor) -> Vec<String> {
    let mut args = to_args(&["bsub"]);
    if let Some(name) = &job.name {
        args.extend([String::from("-J"), name.clone()]);
    }
    if let Some(queue) = &job.queue {
        args.extend([String::from("-q"), queue.clone()]);
    }
    if let Some(walltime) = &job.walltime {
        // [hours:]minutes, rounded up
        let minutes = walltime.as_secs().div_ceil(60);
        args.extend([
            String::from("-W"),
            format!("{}:{:02}", minutes / 60, minutes % 60),
        ]);
    }
    match (job.nodes, job.cpus_per_node) {
        (Some(nodes), Some(cpus)) => {
            args.extend([String::from("-n"), (nodes * cpus).to_string()]);
            args.extend([String::from("-R"), format!("span[ptile={cpus}]")]);
        }
        (Some(nodes), None) => {
            args.extend([String::from("-n"), nodes.to_string()]);
            args.extend([String::from("-R"), String::from("span[ptile=1]")]);
        }
        (None, Some(cpus)) => {
            args.extend([String::from("-n"), cpus.to_string()]);
            args.extend([String::from("-R"), String::from("span[hosts=1]")]);
        }
        (None, None) => {}
    }
    if let Some(memory) = job.memory {
        args.extend([String::from("-M"), format!("{memory}MB")]);
    }
    if let Some(stdout) = &job.stdout {
        args.extend([String::from("-o"), stdout.display().to_string()]);
    }
    if let Some(stderr) = &job.stderr {
        args.extend([String::from("-e"), stderr.display().to_string()]);
    }
    if let Some(work_dir) = &job.work_dir {
        args.extend([String::from("-cwd"), work_dir.display().to_string()]);
    }
    args.extend(job.extra_args.iter().cloned());
    args.push(job.script.display().to_string());
    args
}

/// `Job <1234> is submitted to queue <normal>.`
fn parse_bsub_output(output: &str) -> BackendResult<String> {
    output
        .lines()
        .find(|line| line.trim_start().starts_with("Job <"))
        .and_then(|line| {
            let start = line.find('<')? + 1;
            let end = start + line[start..].find('>')?;
            Some(line[start..end].to_string())
        })
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            BackendError::InvalidResponse(format!("Missing job id in bsub output\n{output}"))
        })
}

pub fn parse_lsf_state(state: &str) -> JobStatus {
    match state {
        "PEND" | "PROV" => JobStatus::Queued,
        "WAIT" | "PSUSP" | "USUSP" | "SSUSP" => JobStatus::Waiting,
        "RUN" => JobStatus::Running,
        "DONE" => JobStatus::Completed,
        "EXIT" => JobStatus::Failed,
        other => unknown_state(BackendType::Lsf, other),
    }
}
