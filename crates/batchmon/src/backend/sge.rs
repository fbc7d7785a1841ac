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
use crate::common::utils::format_hms;

const UNKNOWN_JOB: &[&str] = &["does not exist"];

pub struct SgeAdapter {
    workdir: PathBuf,
}

impl SgeAdapter {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

impl BackendAdapter for SgeAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::Sge
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Identifier
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let arguments = build_qsub_args(job);
        let workdir = submission_dir(job, &self.workdir);

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await?;
            let output = check_command_output("qsub", output, None, &[], FailureKind::Rejected)?;
            // Array jobs are reported as `<id>.<range>`
            let line = first_line("qsub", output.stdout("qsub")?)?;
            let native_id = line.split('.').next().unwrap_or(line).to_string();
            log::debug!("SGE job {native_id} submitted");
            Ok(SubmittedJob::new(native_id))
        })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        let native_id = native_id.to_string();
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let output = run_command(to_args(&["qdel", &native_id]), &workdir).await?;
            check_command_output(
                "qdel",
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
            let native_id = expect_identifier(BackendType::Sge, query)?;
            let output = run_command(to_args(&["qstat", "-u", "*"]), &workdir).await?;
            let output =
                check_command_output("qstat", output, None, &[], FailureKind::Unavailable)?;
            parse_qstat_listing(&native_id, output.stdout("qstat")?)
        })
    }
}

fn build_qsub_args(job: &JobDescriptor) -> Vec<String> {
    let mut args = to_args(&["qsub", "-terse"]);
    if let Some(name) = &job.name {
        args.extend([String::from("-N"), name.clone()]);
    }
    if let Some(queue) = &job.queue {
        args.extend([String::from("-q"), queue.clone()]);
    }
    if let Some(walltime) = &job.walltime {
        args.extend([String::from("-l"), format!("h_rt={}", format_hms(walltime))]);
    }
    let slots = match (job.nodes, job.cpus_per_node) {
        (Some(nodes), Some(cpus)) => Some(nodes * cpus),
        (Some(count), None) | (None, Some(count)) => Some(count),
        (None, None) => None,
    };
    if let Some(slots) = slots {
        args.extend([String::from("-pe"), String::from("smp"), slots.to_string()]);
    }
    if let Some(memory) = job.memory {
        args.extend([String::from("-l"), format!("h_vmem={memory}M")]);
    }
    if let Some(stdout) = &job.stdout {
        args.extend([String::from("-o"), stdout.display().to_string()]);
    }
    if let Some(stderr) = &job.stderr {
        args.extend([String::from("-e"), stderr.display().to_string()]);
    }
    if let Some(work_dir) = &job.work_dir {
        args.extend([String::from("-wd"), work_dir.display().to_string()]);
    }
    args.extend(job.extra_args.iter().cloned());
    args.push(job.script.display().to_string());
    args
}

/// Finds the job in the `qstat` listing. Jobs that have left the listing are not known anymore.
fn parse_qstat_listing(native_id: &str, output: &str) -> BackendResult<JobStatus> {
    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.first() == Some(&native_id) {
            let state = columns.get(4).ok_or_else(|| {
                BackendError::InvalidResponse(format!("Missing state of job {native_id}"))
            })?;
            return Ok(parse_sge_state(state));
        }
    }
    Err(BackendError::NotFound(native_id.to_string()))
}

/// SGE states are combinations of single letter flags, e.g. `hqw` or `Eqw`.
pub fn parse_sge_state(state: &str) -> JobStatus {
    if state.contains('E') {
        JobStatus::Failed
    } else if state.contains('d') {
        JobStatus::Cancelled
    } else if state.contains(['s', 'S', 'T']) {
        JobStatus::Waiting
    } else if state.contains(['r', 't']) {
        JobStatus::Running
    } else if state.contains('h') {
        JobStatus::Waiting
    } else if state.contains(['q', 'w']) {
        JobStatus::Queued
    } else {
        unknown_state(BackendType::Sge, state)
    }
}
