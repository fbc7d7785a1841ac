use std::path::PathBuf;

use batchcore::{BackendType, JobStatus, Map};

use crate::backend::common::{
    FailureKind, check_command_output, expect_identifier, first_line, run_command,
    submission_dir, to_args, unknown_state,
};
use crate::backend::{
    BackendAdapter, BackendError, BackendFuture, BackendResult, JobDescriptor, QueryStyle,
    StateQuery, SubmittedJob,
};
use crate::common::utils::format_hms;

const UNKNOWN_JOB: &[&str] = &["unknown job id"];

/// The two PBS families differ in resource syntax and in the `qstat` output format.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PbsFlavor {
    Pro,
    Torque,
}

pub struct PbsAdapter {
    flavor: PbsFlavor,
    workdir: PathBuf,
}

impl PbsAdapter {
    pub fn new(flavor: PbsFlavor, workdir: PathBuf) -> Self {
        Self { flavor, workdir }
    }
}

impl BackendAdapter for PbsAdapter {
    fn backend_type(&self) -> BackendType {
        match self.flavor {
            PbsFlavor::Pro => BackendType::Pbs,
            PbsFlavor::Torque => BackendType::Torque,
        }
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Identifier
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let arguments = build_qsub_args(self.flavor, job);
        let workdir = submission_dir(job, &self.workdir);

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await?;
            let output = check_command_output("qsub", output, None, &[], FailureKind::Rejected)?;
            let native_id = first_line("qsub", output.stdout("qsub")?)?.to_string();
            log::debug!("PBS job {native_id} submitted");
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
        let flavor = self.flavor;
        let backend_type = self.backend_type();
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let native_id = expect_identifier(backend_type, query)?;
            let arguments = match flavor {
                // -x will also display finished jobs
                PbsFlavor::Pro => to_args(&["qstat", "-f", &native_id, "-F", "json", "-x"]),
                PbsFlavor::Torque => to_args(&["qstat", "-f", &native_id]),
            };
            let output = run_command(arguments, &workdir).await?;
            let output = check_command_output(
                "qstat",
                output,
                Some(&native_id),
                UNKNOWN_JOB,
                FailureKind::Unavailable,
            )?;
            let stdout = output.stdout("qstat")?;
            match flavor {
                PbsFlavor::Pro => parse_pro_status(&native_id, stdout),
                PbsFlavor::Torque => parse_torque_status(&native_id, stdout),
            }
        })
    }
}

fn build_qsub_args(flavor: PbsFlavor, job: &JobDescriptor) -> Vec<String> {
    let mut args = to_args(&["qsub"]);
    if let Some(name) = &job.name {
        args.extend([String::from("-N"), name.clone()]);
    }
    if let Some(queue) = &job.queue {
        args.extend([String::from("-q"), queue.clone()]);
    }
    if let Some(walltime) = &job.walltime {
        args.extend([
            String::from("-l"),
            format!("walltime={}", format_hms(walltime)),
        ]);
    }
    match flavor {
        PbsFlavor::Pro => {
            if job.nodes.is_some() || job.cpus_per_node.is_some() || job.memory.is_some() {
                let mut select = format!("select={}", job.nodes.unwrap_or(1));
                if let Some(cpus) = job.cpus_per_node {
                    select.push_str(&format!(":ncpus={cpus}"));
                }
                if let Some(memory) = job.memory {
                    select.push_str(&format!(":mem={memory}mb"));
                }
                args.extend([String::from("-l"), select]);
            }
        }
        PbsFlavor::Torque => {
            if job.nodes.is_some() || job.cpus_per_node.is_some() {
                let mut nodes = format!("nodes={}", job.nodes.unwrap_or(1));
                if let Some(cpus) = job.cpus_per_node {
                    nodes.push_str(&format!(":ppn={cpus}"));
                }
                args.extend([String::from("-l"), nodes]);
            }
            if let Some(memory) = job.memory {
                args.extend([String::from("-l"), format!("mem={memory}mb")]);
            }
            if let Some(work_dir) = &job.work_dir {
                args.extend([String::from("-d"), work_dir.display().to_string()]);
            }
        }
    }
    if let Some(stdout) = &job.stdout {
        args.extend([String::from("-o"), stdout.display().to_string()]);
    }
    if let Some(stderr) = &job.stderr {
        args.extend([String::from("-e"), stderr.display().to_string()]);
    }
    args.extend(job.extra_args.iter().cloned());
    args.push(job.script.display().to_string());
    args
}

fn finished_status(exit_status: Option<i64>) -> JobStatus {
    match exit_status {
        Some(0) | None => JobStatus::Completed,
        Some(_) => JobStatus::Failed,
    }
}

pub fn parse_pbs_state(state: &str, exit_status: Option<i64>) -> JobStatus {
    match state {
        "Q" | "T" => JobStatus::Queued,
        "H" | "W" | "S" | "U" => JobStatus::Waiting,
        "R" | "E" | "B" => JobStatus::Running,
        "F" | "X" | "C" => finished_status(exit_status),
        other => unknown_state(BackendType::Pbs, other),
    }
}

/// Reads the state from `qstat -f -F json -x` output.
fn parse_pro_status(native_id: &str, output: &str) -> BackendResult<JobStatus> {
    let data: serde_json::Value = serde_json::from_str(output).map_err(|e| {
        BackendError::InvalidResponse(format!("Cannot parse qstat JSON output: {e}"))
    })?;
    let jobs = data["Jobs"].as_object();
    let job = jobs.and_then(|jobs| {
        jobs.get(native_id).or_else(|| {
            // qstat may report the id with a different server suffix
            (jobs.len() == 1).then(|| jobs.values().next()).flatten()
        })
    });
    let Some(job) = job else {
        return Err(BackendError::NotFound(native_id.to_string()));
    };
    let state = job["job_state"].as_str().ok_or_else(|| {
        BackendError::InvalidResponse(format!("JSON key job_state not found for job {native_id}"))
    })?;
    Ok(parse_pbs_state(state, job["Exit_status"].as_i64()))
}

/// Reads the state from the `key = value` listing of `qstat -f`.
fn parse_torque_status(native_id: &str, output: &str) -> BackendResult<JobStatus> {
    let items = get_qstat_items(output);
    let state = items.get("job_state").ok_or_else(|| {
        BackendError::InvalidResponse(format!(
            "Missing job_state in qstat output of job {native_id}"
        ))
    })?;
    let exit_status = items
        .get("exit_status")
        .and_then(|value| value.parse::<i64>().ok());
    Ok(parse_pbs_state(state, exit_status))
}

fn get_qstat_items(output: &str) -> Map<&str, &str> {
    let mut map = Map::default();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once(" = ") {
            map.insert(key.trim(), value.trim());
        }
    }
    map
}
