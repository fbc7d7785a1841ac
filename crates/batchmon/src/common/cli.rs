use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser)]
pub struct CommonOpts {
    /// Path to the configuration file
    #[arg(
        long,
        short('c'),
        value_hint = clap::ValueHint::FilePath,
        global = true,
        env = "BATCHMON_CONFIG",
        default_value = "batchmon.toml",
        help_heading("GLOBAL OPTIONS")
    )]
    pub config: PathBuf,

    /// Turn on a more detailed log output
    #[arg(
        long,
        global = true,
        env = "BATCHMON_DEBUG",
        help_heading("GLOBAL OPTIONS")
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::BATCHMON_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand)]
pub enum SubCommand {
    /// Run the reconciliation loop until SIGINT/SIGTERM is received
    Run,
    /// Run a single reconciliation cycle and print its report
    Cycle,
    /// Create the database tables and register the instance identity
    InitDb,
    /// List supported backends
    Backends,
    /// Submit a job script through the configured backend
    Submit(SubmitOpts),
    /// Cancel a job
    Cancel(CancelOpts),
}

#[derive(Parser)]
pub struct SubmitOpts {
    /// Path to the job script
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub script: PathBuf,

    /// Owner of the job
    #[arg(long, env = "USER")]
    pub owner: String,

    /// Name of the job
    #[arg(long)]
    pub name: Option<String>,

    /// Queue (partition) into which the job is submitted
    #[arg(long)]
    pub queue: Option<String>,

    /// Time limit of the job (e.g. `2h`, `30m`)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub walltime: Option<Duration>,

    /// Number of requested nodes
    #[arg(long)]
    pub nodes: Option<u32>,

    /// Number of requested CPUs per node
    #[arg(long)]
    pub cpus_per_node: Option<u32>,

    /// Requested memory in MiB
    #[arg(long)]
    pub memory: Option<u64>,

    /// Path of the standard output file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Path of the standard error file
    #[arg(long)]
    pub error: Option<PathBuf>,

    /// Working directory of the job
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Submit through this backend instead of the configured one (e.g. `posix`)
    #[arg(long)]
    pub backend: Option<String>,

    /// Additional arguments passed to the submission command
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}

#[derive(Parser)]
pub struct CancelOpts {
    /// Identifier of the job
    pub job_id: String,
}
