use std::path::PathBuf;

use batchcore::{BackendType, JobStatus, Map};

use crate::backend::common::{
    FailureKind, check_command_output, expect_identifier, run_command, submission_dir, to_args,
    unknown_state,
};
use crate::backend::{
    BackendAdapter, BackendError, BackendFuture, BackendResult, JobDescriptor, QueryStyle,
    StateQuery, SubmittedJob,
};
use crate::common::utils::format_hms;

const UNKNOWN_JOB: &[&str] = &["invalid job id"];

pub struct SlurmAdapter {
    workdir: PathBuf,
}

impl SlurmAdapter {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

impl BackendAdapter for SlurmAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::Slurm
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Identifier
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let arguments = build_sbatch_args(job);
        let workdir = submission_dir(job, &self.workdir);

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await?;
            let output = check_command_output("sbatch", output, None, &[], FailureKind::Rejected)?;
            let native_id = parse_sbatch_output(output.stdout("sbatch")?)?;
            log::debug!("Slurm job {native_id} submitted");
            Ok(SubmittedJob::new(native_id))
        })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        let native_id = native_id.to_string();
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let output = run_command(to_args(&["scancel", &native_id]), &workdir).await?;
            check_command_output(
                "scancel",
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
            let native_id = expect_identifier(BackendType::Slurm, query)?;
            let output =
                run_command(to_args(&["scontrol", "show", "job", &native_id]), &workdir).await?;
            let output = check_command_output(
                "scontrol",
                output,
                Some(&native_id),
                UNKNOWN_JOB,
                FailureKind::Unavailable,
            )?;
            let items = get_scontrol_items(output.stdout("scontrol")?);
            let state = items.get("JobState").ok_or_else(|| {
                BackendError::InvalidResponse(format!(
                    "Missing key JobState in scontrol output of job {native_id}"
                ))
            })?;
            Ok(parse_slurm_state(state))
        })
    }
}

fn build_sbatch_args(job: &JobDescriptor) -> Vec<String> {
    let mut args = to_args(&["sbatch", "--parsable"]);
    if let Some(name) = &job.name {
        args.push(format!("--job-name={name}"));
    }
    if let Some(queue) = &job.queue {
        args.push(format!("--partition={queue}"));
    }
    if let Some(walltime) = &job.walltime {
        args.push(format!("--time={}", format_hms(walltime)));
    }
    if let Some(nodes) = job.nodes {
        args.push(format!("--nodes={nodes}"));
    }
    if let Some(cpus) = job.cpus_per_node {
        args.push(format!("--ntasks-per-node={cpus}"));
    }
    if let Some(memory) = job.memory {
        args.push(format!("--mem={memory}M"));
    }
    if let Some(stdout) = &job.stdout {
        args.push(format!("--output={}", stdout.display()));
    }
    if let Some(stderr) = &job.stderr {
        args.push(format!("--error={}", stderr.display()));
    }
    if let Some(work_dir) = &job.work_dir {
        args.push(format!("--chdir={}", work_dir.display()));
    }
    args.extend(job.extra_args.iter().cloned());
    args.push(job.script.display().to_string());
    args
}

/// `sbatch --parsable` prints `<job-id>[;<cluster>]`.
fn parse_sbatch_output(output: &str) -> BackendResult<String> {
    output
        .lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .and_then(|line| line.split(';').next())
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .ok_or_else(|| {
            BackendError::InvalidResponse(format!("Missing job id in sbatch output\n{output}"))
        })
}

pub fn parse_slurm_state(state: &str) -> JobStatus {
    // `CANCELLED by <uid>` is reported by some versions
    let state = state.split_whitespace().next().unwrap_or_default();
    match state {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "SUSPENDED" | "RESV_DEL_HOLD" => {
            JobStatus::Waiting
        }
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" => JobStatus::Running,
        "COMPLETED" | "TIMEOUT" => JobStatus::Completed,
        "CANCELLED" | "PREEMPTED" | "REVOKED" | "DEADLINE" => JobStatus::Cancelled,
        "FAILED" | "NODE_FAIL" | "BOOT_FAIL" | "OUT_OF_MEMORY" => JobStatus::Failed,
        other => unknown_state(BackendType::Slurm, other),
    }
}

/// Parse <key>=<value> pairs from the output of `scontrol show job <job-id>`.
pub fn get_scontrol_items(output: &str) -> Map<&str, &str> {
    let mut map = Map::default();
    for line in output.lines() {
        for item in line.trim().split(' ') {
            let Some((key, value)) = item.split_once('=') else {
                continue;
            };
            map.insert(key, value);
        }
    }
    map
}
