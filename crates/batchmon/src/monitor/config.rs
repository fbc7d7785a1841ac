use std::time::Duration;

use batchcore::BackendDescriptor;

/// Pause between two reconciliation cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Longest time a single backend state query may take.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// How many backend state queries may run at the same time.
pub const DEFAULT_MAX_PARALLEL_QUERIES: usize = 8;

/// Which checks are performed in each cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Subsystems {
    pub sessions: bool,
    pub jobs: bool,
    pub transfers: bool,
}

impl Default for Subsystems {
    fn default() -> Self {
        Self {
            sessions: true,
            jobs: true,
            transfers: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Identity of the platform instance, must exist in the `vishnu` table.
    pub instance_id: String,
    /// Only jobs submitted from this machine are reconciled.
    pub machine_id: String,
    /// Default backend of the machine.
    pub backend: BackendDescriptor,
    pub subsystems: Subsystems,
    pub interval: Duration,
    pub backend_timeout: Duration,
    pub max_parallel_queries: usize,
}

impl MonitorConfig {
    /// Durations can be overridden by the `BATCHMON_INTERVAL_MS` and `BATCHMON_BACKEND_TIMEOUT_MS`
    /// environment variables.
    pub fn new(
        instance_id: String,
        machine_id: String,
        backend: BackendDescriptor,
        subsystems: Subsystems,
        interval: Option<Duration>,
        backend_timeout: Option<Duration>,
        max_parallel_queries: Option<usize>,
    ) -> Self {
        Self {
            instance_id,
            machine_id,
            backend,
            subsystems,
            interval: get_duration_from_env("BATCHMON_INTERVAL_MS")
                .or(interval)
                .unwrap_or(DEFAULT_INTERVAL),
            backend_timeout: get_duration_from_env("BATCHMON_BACKEND_TIMEOUT_MS")
                .or(backend_timeout)
                .unwrap_or(DEFAULT_BACKEND_TIMEOUT),
            max_parallel_queries: max_parallel_queries
                .unwrap_or(DEFAULT_MAX_PARALLEL_QUERIES)
                .max(1),
        }
    }
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}
