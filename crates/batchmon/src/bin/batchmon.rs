use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, FromArgMatches};
use tokio::sync::Notify;

use batchmon::backend::JobDescriptor;
use batchmon::backend::registry::BackendRegistry;
use batchmon::batchcore::gateway::{PersistenceGateway, SqliteGateway, Statement};
use batchmon::batchcore::{BackendDescriptor, BackendType, JobId};
use batchmon::common::cli::{CancelOpts, RootOptions, SubCommand, SubmitOpts};
use batchmon::common::config::ConfigFile;
use batchmon::common::process::{ProcessProbe, SystemProcessProbe};
use batchmon::common::setup::setup_logging;
use batchmon::common::signal::SignalThread;
use batchmon::monitor::Monitor;
use batchmon::session::GatewaySessionCloser;
use batchmon::submission::{cancel_job, submit_job};

fn open_gateway(path: &Path) -> anyhow::Result<Arc<dyn PersistenceGateway>> {
    let gateway = SqliteGateway::open(path)
        .with_context(|| format!("Cannot open database {}", path.display()))?;
    Ok(Arc::new(gateway))
}

fn create_registry(config: &ConfigFile, probe: Arc<dyn ProcessProbe>) -> BackendRegistry {
    BackendRegistry::new(config.backend_settings(), probe)
}

fn create_monitor(config: &ConfigFile) -> anyhow::Result<Monitor> {
    let gateway = open_gateway(&config.database)?;
    let probe: Arc<dyn ProcessProbe> = Arc::new(SystemProcessProbe);
    let registry = Arc::new(create_registry(config, probe.clone()));
    let sessions = Arc::new(GatewaySessionCloser::new(gateway.clone()));
    let monitor = Monitor::new(
        config.monitor_config()?,
        gateway,
        registry,
        sessions,
        probe,
    );
    monitor.validate_identity()?;
    Ok(monitor)
}

// Commands

async fn command_run(config: &ConfigFile) -> anyhow::Result<()> {
    let monitor = create_monitor(config)?;
    let stop = Arc::new(Notify::new());
    let _signal_thread = SignalThread::new(stop.clone())?;
    monitor.run(stop).await?;
    Ok(())
}

async fn command_cycle(config: &ConfigFile) -> anyhow::Result<()> {
    let monitor = create_monitor(config)?;
    let report = monitor.run_cycle().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn command_init_db(config: &ConfigFile) -> anyhow::Result<()> {
    let gateway = SqliteGateway::open(&config.database)
        .with_context(|| format!("Cannot open database {}", config.database.display()))?;
    gateway.create_schema()?;
    let mut connection = gateway.acquire()?;
    let inserted = connection.execute(
        &Statement::new("INSERT OR IGNORE INTO vishnu (vishnuid, created_at) VALUES (?1, ?2)")
            .bind(&config.instance_id)
            .bind(chrono::Utc::now()),
    )?;
    if inserted > 0 {
        log::info!("Instance {} registered", config.instance_id);
    } else {
        log::info!("Instance {} is already registered", config.instance_id);
    }
    Ok(())
}

fn command_backends() -> anyhow::Result<()> {
    for backend in BackendRegistry::supported() {
        println!("{backend}");
    }
    Ok(())
}

async fn command_submit(config: &ConfigFile, opts: SubmitOpts) -> anyhow::Result<()> {
    let backend = match &opts.backend {
        Some(name) => BackendDescriptor::new(name.parse::<BackendType>()?, ""),
        None => config.backend_descriptor()?,
    };
    let gateway = open_gateway(&config.database)?;
    let registry = create_registry(config, Arc::new(SystemProcessProbe));
    let job = JobDescriptor {
        script: opts.script,
        name: opts.name,
        queue: opts.queue,
        walltime: opts.walltime,
        nodes: opts.nodes,
        cpus_per_node: opts.cpus_per_node,
        memory: opts.memory,
        stdout: opts.output,
        stderr: opts.error,
        work_dir: opts.work_dir,
        extra_args: opts.extra_args,
    };
    let record = submit_job(
        gateway.as_ref(),
        &registry,
        &backend,
        &opts.owner,
        &config.machine_id(),
        &job,
    )
    .await?;
    println!("{}", record.id);
    Ok(())
}

async fn command_cancel(config: &ConfigFile, opts: CancelOpts) -> anyhow::Result<()> {
    let gateway = open_gateway(&config.database)?;
    let registry = create_registry(config, Arc::new(SystemProcessProbe));
    let id = JobId::new(opts.job_id);
    let status = cancel_job(gateway.as_ref(), &registry, &id).await?;
    println!("{id} {status}");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> batchmon::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let result = match top_opts.subcmd {
        SubCommand::Backends => command_backends(),
        subcmd => match ConfigFile::load(&top_opts.common.config) {
            Ok(config) => match subcmd {
                SubCommand::Run => command_run(&config).await,
                SubCommand::Cycle => command_cycle(&config).await,
                SubCommand::InitDb => command_init_db(&config),
                SubCommand::Submit(opts) => command_submit(&config, opts).await,
                SubCommand::Cancel(opts) => command_cancel(&config, opts).await,
                SubCommand::Backends => command_backends(),
            },
            Err(error) => Err(error),
        },
    };

    if let Err(e) = result {
        log::error!("{e:?}");
        std::process::exit(1);
    }

    Ok(())
}
