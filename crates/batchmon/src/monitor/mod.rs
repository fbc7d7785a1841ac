//! Periodic reconciliation of sessions, jobs and file transfers with their ground truth.
pub mod config;
mod jobs;
mod sessions;
mod transfers;

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;

use batchcore::gateway::{GatewayError, PersistenceGateway, Statement};

use crate::backend::registry::BackendRegistry;
use crate::common::process::ProcessProbe;
use crate::monitor::config::MonitorConfig;
use crate::session::SessionCloser;

pub(crate) use jobs::update_job_status;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Instance `{0}` is not registered in the database")]
    UnknownIdentity(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    /// The ground truth is not reachable, the monitor must not continue.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Fatal gateway errors end the cycle, the others are returned to be logged.
fn escalate(error: GatewayError) -> Result<GatewayError, MonitorError> {
    if error.is_fatal() {
        Err(MonitorError::Fatal(error.to_string()))
    } else {
        Ok(error)
    }
}

/// Counters of one reconciliation cycle.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CycleReport {
    pub sessions_closed: usize,
    pub sessions_failed: usize,
    pub jobs_checked: usize,
    pub jobs_updated: usize,
    pub jobs_failed: usize,
    pub transfers_checked: usize,
    pub transfers_interrupted: usize,
    pub transfers_failed: usize,
}

impl CycleReport {
    pub fn has_changes(&self) -> bool {
        self.sessions_closed > 0 || self.jobs_updated > 0 || self.transfers_interrupted > 0
    }
}

impl Display for CycleReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sessions closed/failed: {}/{}, jobs checked/updated/failed: {}/{}/{}, \
             transfers checked/interrupted/failed: {}/{}/{}",
            self.sessions_closed,
            self.sessions_failed,
            self.jobs_checked,
            self.jobs_updated,
            self.jobs_failed,
            self.transfers_checked,
            self.transfers_interrupted,
            self.transfers_failed
        )
    }
}

/// The reconciliation engine.
///
/// It keeps no state between cycles, every cycle reads its candidates from the database again.
pub struct Monitor {
    config: MonitorConfig,
    gateway: Arc<dyn PersistenceGateway>,
    registry: Arc<BackendRegistry>,
    sessions: Arc<dyn SessionCloser>,
    probe: Arc<dyn ProcessProbe>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        gateway: Arc<dyn PersistenceGateway>,
        registry: Arc<BackendRegistry>,
        sessions: Arc<dyn SessionCloser>,
        probe: Arc<dyn ProcessProbe>,
    ) -> Self {
        Self {
            config,
            gateway,
            registry,
            sessions,
            probe,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Checks that the configured instance identity is known to the database.
    pub fn validate_identity(&self) -> Result<(), MonitorError> {
        let instance_id = &self.config.instance_id;
        let result = self
            .gateway
            .acquire()
            .and_then(|mut connection| {
                connection.query(
                    &Statement::new("SELECT vishnuid FROM vishnu WHERE vishnuid = ?1")
                        .bind(instance_id),
                )
            })
            .map_err(|error| match escalate(error) {
                Ok(error) => MonitorError::Configuration(error.to_string()),
                Err(fatal) => fatal,
            })?;
        if result.is_empty() {
            return Err(MonitorError::UnknownIdentity(instance_id.clone()));
        }
        Ok(())
    }

    /// Performs the session, job and transfer checks once.
    ///
    /// Failures of individual records are logged and counted in the report. Only a fatal error
    /// ends the cycle early.
    pub async fn run_cycle(&self) -> Result<CycleReport, MonitorError> {
        let mut report = CycleReport::default();
        let start = Instant::now();
        let subsystems = self.config.subsystems;

        if subsystems.sessions {
            sessions::check_sessions(self.sessions.as_ref(), &mut report)?;
        }
        if subsystems.jobs {
            jobs::check_jobs(self, &mut report).await?;
        }
        if subsystems.transfers {
            transfers::check_transfers(self.gateway.as_ref(), self.probe.as_ref(), &mut report)?;
        }

        if report.has_changes() {
            log::info!("Cycle finished in {:?}: {report}", start.elapsed());
        } else {
            log::debug!("Cycle finished in {:?}: {report}", start.elapsed());
        }
        Ok(report)
    }

    /// Runs cycles until `stop` is notified. A stop request is honored while waiting for the next
    /// cycle.
    pub async fn run(&self, stop: Arc<Notify>) -> Result<(), MonitorError> {
        log::info!(
            "Monitoring instance {} on machine {} (backend {}, interval {:?})",
            self.config.instance_id,
            self.config.machine_id,
            self.config.backend,
            self.config.interval
        );
        loop {
            self.run_cycle().await?;
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = stop.notified() => {
                    log::info!("Stopping the monitor");
                    break;
                }
            }
        }
        Ok(())
    }
}
