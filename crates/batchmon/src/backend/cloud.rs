//! Cloud backends run every job in its own virtual machine.
//!
//! Both adapters answer state queries from the serialized job record, because the VM identifier is
//! stored next to the native job identifier.
use std::path::{Path, PathBuf};

use serde_json::Value;

use batchcore::{BackendType, JobRecord, JobStatus};

use crate::backend::common::{
    FailureKind, check_command_output, expect_descriptor, run_command, submission_dir, to_args,
    unknown_state,
};
use crate::backend::registry::CloudSettings;
use crate::backend::{
    BackendAdapter, BackendError, BackendFuture, BackendResult, JobDescriptor, QueryStyle,
    StateQuery, SubmittedJob,
};

const ONE_UNKNOWN_VM: &[&str] = &["error getting virtual machine", "not found"];
const OPENSTACK_UNKNOWN_SERVER: &[&str] = &["no server with a name or id"];

fn vm_of(job: &JobRecord) -> String {
    job.vm_id.clone().unwrap_or_else(|| job.native_id.clone())
}

fn read_script(path: &Path) -> BackendResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        BackendError::Rejected(format!("Cannot read script {}: {e}", path.display()))
    })
}

fn parse_json(program: &str, output: &str) -> BackendResult<Value> {
    serde_json::from_str(output).map_err(|e| {
        BackendError::InvalidResponse(format!("Cannot parse {program} output as JSON: {e}"))
    })
}

/// OpenNebula emits numbers as strings in its JSON output.
fn json_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub struct OpenNebulaAdapter {
    workdir: PathBuf,
    settings: CloudSettings,
}

impl OpenNebulaAdapter {
    pub fn new(workdir: PathBuf, settings: CloudSettings) -> Self {
        Self { workdir, settings }
    }
}

impl BackendAdapter for OpenNebulaAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::OpenNebula
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Descriptor
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let job = job.clone();
        let workdir = submission_dir(&job, &self.workdir);
        let template = self.settings.template.clone();

        Box::pin(async move {
            let template = template.ok_or_else(|| {
                BackendError::Rejected("OpenNebula requires a VM template".to_string())
            })?;
            let script = read_script(&job.script)?;
            let arguments = build_instantiate_args(&template, &job, &script);
            let output = run_command(arguments, &workdir).await?;
            let output =
                check_command_output("onetemplate", output, None, &[], FailureKind::Rejected)?;
            let vm_id = parse_instantiate_output(output.stdout("onetemplate")?)?;
            log::debug!("OpenNebula VM {vm_id} instantiated");
            Ok(SubmittedJob {
                native_id: vm_id.clone(),
                vm_address: None,
                vm_id: Some(vm_id),
            })
        })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        let native_id = native_id.to_string();
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let output = run_command(
                to_args(&["onevm", "terminate", "--hard", &native_id]),
                &workdir,
            )
            .await?;
            check_command_output(
                "onevm",
                output,
                Some(&native_id),
                ONE_UNKNOWN_VM,
                FailureKind::Unavailable,
            )?;
            Ok(())
        })
    }

    fn query_state(&self, query: StateQuery) -> BackendFuture<JobStatus> {
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let job = expect_descriptor(BackendType::OpenNebula, query)?;
            let vm_id = vm_of(&job);
            let output =
                run_command(to_args(&["onevm", "show", &vm_id, "--json"]), &workdir).await?;
            let output = check_command_output(
                "onevm",
                output,
                Some(&vm_id),
                ONE_UNKNOWN_VM,
                FailureKind::Unavailable,
            )?;
            parse_onevm_output(&parse_json("onevm", output.stdout("onevm")?)?)
        })
    }
}

/// The script is handed over as the start script of the VM context.
fn build_instantiate_args(template: &str, job: &JobDescriptor, script: &str) -> Vec<String> {
    let mut args = to_args(&["onetemplate", "instantiate", template]);
    if let Some(name) = &job.name {
        args.extend([String::from("--name"), name.clone()]);
    }
    if let Some(cpus) = job.cpus_per_node {
        args.extend([String::from("--vcpu"), cpus.to_string()]);
    }
    if let Some(memory) = job.memory {
        args.extend([String::from("--memory"), memory.to_string()]);
    }
    let escaped = script.replace('\\', "\\\\").replace('"', "\\\"");
    args.extend([
        String::from("--raw"),
        format!("CONTEXT=[START_SCRIPT=\"{escaped}\", NETWORK=\"YES\"]"),
    ]);
    args.extend(job.extra_args.iter().cloned());
    args
}

/// `VM ID: 42`
fn parse_instantiate_output(output: &str) -> BackendResult<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("VM ID:"))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            BackendError::InvalidResponse(format!(
                "Missing VM id in onetemplate output\n{output}"
            ))
        })
}

fn parse_onevm_output(output: &Value) -> BackendResult<JobStatus> {
    let vm = &output["VM"];
    let state = json_number(&vm["STATE"])
        .ok_or_else(|| BackendError::InvalidResponse("Missing VM state".to_string()))?;
    let lcm_state = json_number(&vm["LCM_STATE"]).unwrap_or(0);
    Ok(parse_opennebula_state(state, lcm_state))
}

/// Maps the VM state and its life-cycle sub-state.
pub fn parse_opennebula_state(state: u64, lcm_state: u64) -> JobStatus {
    const LCM_RUNNING: u64 = 3;
    match state {
        // INIT, PENDING, CLONING
        0 | 1 | 10 => JobStatus::Queued,
        // HOLD, STOPPED, SUSPENDED, POWEROFF, UNDEPLOYED; all of them can be resumed
        2 | 4 | 5 | 8 | 9 => JobStatus::Waiting,
        // ACTIVE
        3 if lcm_state == LCM_RUNNING => JobStatus::Running,
        3 => JobStatus::Waiting,
        // DONE
        6 => JobStatus::Completed,
        // FAILED, CLONING_FAILURE
        7 | 11 => JobStatus::Failed,
        other => unknown_state(BackendType::OpenNebula, &other.to_string()),
    }
}

/// Servers of an OpenStack deployment, driven through the `openstack` client.
pub struct OpenStackAdapter {
    workdir: PathBuf,
    settings: CloudSettings,
}

impl OpenStackAdapter {
    pub fn new(workdir: PathBuf, settings: CloudSettings) -> Self {
        Self { workdir, settings }
    }
}

impl BackendAdapter for OpenStackAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::DeltaCloud
    }

    fn query_style(&self) -> QueryStyle {
        QueryStyle::Descriptor
    }

    fn submit(&self, job: &JobDescriptor) -> BackendFuture<SubmittedJob> {
        let arguments = build_server_create_args(&self.settings, job);
        let workdir = submission_dir(job, &self.workdir);

        Box::pin(async move {
            let arguments = arguments?;
            let output = run_command(arguments, &workdir).await?;
            let output =
                check_command_output("openstack", output, None, &[], FailureKind::Rejected)?;
            let submitted =
                parse_server_create_output(&parse_json("openstack", output.stdout("openstack")?)?)?;
            log::debug!("OpenStack server {} created", submitted.native_id);
            Ok(submitted)
        })
    }

    fn cancel(&self, native_id: &str) -> BackendFuture<()> {
        let native_id = native_id.to_string();
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let output = run_command(
                to_args(&["openstack", "server", "delete", &native_id]),
                &workdir,
            )
            .await?;
            check_command_output(
                "openstack",
                output,
                Some(&native_id),
                OPENSTACK_UNKNOWN_SERVER,
                FailureKind::Unavailable,
            )?;
            Ok(())
        })
    }

    fn query_state(&self, query: StateQuery) -> BackendFuture<JobStatus> {
        let workdir = self.workdir.clone();

        Box::pin(async move {
            let job = expect_descriptor(BackendType::DeltaCloud, query)?;
            let server = vm_of(&job);
            let output = run_command(
                to_args(&["openstack", "server", "show", &server, "-f", "json"]),
                &workdir,
            )
            .await?;
            let output = check_command_output(
                "openstack",
                output,
                Some(&server),
                OPENSTACK_UNKNOWN_SERVER,
                FailureKind::Unavailable,
            )?;
            let output = parse_json("openstack", output.stdout("openstack")?)?;
            let status = output["status"].as_str().ok_or_else(|| {
                BackendError::InvalidResponse(format!("Missing status of server {server}"))
            })?;
            Ok(parse_openstack_status(status))
        })
    }
}

fn build_server_create_args(
    settings: &CloudSettings,
    job: &JobDescriptor,
) -> BackendResult<Vec<String>> {
    let image = settings
        .image
        .as_ref()
        .ok_or_else(|| BackendError::Rejected("OpenStack requires an image".to_string()))?;
    let flavor = settings
        .flavor
        .as_ref()
        .ok_or_else(|| BackendError::Rejected("OpenStack requires a flavor".to_string()))?;

    let mut args = to_args(&[
        "openstack", "server", "create", "--image", image, "--flavor", flavor,
    ]);
    if let Some(network) = &settings.network {
        args.extend([String::from("--network"), network.clone()]);
    }
    if let Some(key_name) = &settings.key_name {
        args.extend([String::from("--key-name"), key_name.clone()]);
    }
    args.extend([
        String::from("--user-data"),
        job.script.display().to_string(),
    ]);
    args.extend(job.extra_args.iter().cloned());
    args.extend(to_args(&["-f", "json"]));
    args.push(
        job.name
            .clone()
            .unwrap_or_else(|| String::from("batchmon-job")),
    );
    Ok(args)
}

fn parse_server_create_output(output: &Value) -> BackendResult<SubmittedJob> {
    let id = output["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BackendError::InvalidResponse("Missing server id".to_string()))?;
    // `addresses` is either a map of networks or a `net=ip` string, depending on the client
    let address = match &output["addresses"] {
        Value::String(text) => text
            .split(['=', ','])
            .nth(1)
            .map(|address| address.trim().to_string()),
        Value::Object(networks) => networks
            .values()
            .filter_map(|addresses| addresses.as_array()?.first()?.as_str())
            .next()
            .map(|address| address.to_string()),
        _ => None,
    };
    Ok(SubmittedJob {
        native_id: id.to_string(),
        vm_address: address.filter(|address| !address.is_empty()),
        vm_id: Some(id.to_string()),
    })
}

pub fn parse_openstack_status(status: &str) -> JobStatus {
    match status {
        "BUILD" => JobStatus::Queued,
        "PAUSED" | "SUSPENDED" | "SHUTOFF" | "SHELVED" | "SHELVED_OFFLOADED" | "VERIFY_RESIZE" => {
            JobStatus::Waiting
        }
        "ACTIVE" | "REBOOT" | "HARD_REBOOT" | "MIGRATING" | "RESIZE" | "REBUILD" | "RESCUE"
        | "PASSWORD" => JobStatus::Running,
        "DELETED" | "SOFT_DELETED" => JobStatus::Cancelled,
        "ERROR" => JobStatus::Failed,
        other => unknown_state(BackendType::DeltaCloud, other),
    }
}
