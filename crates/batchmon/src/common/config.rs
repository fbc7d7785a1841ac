use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Deserializer};

use batchcore::{BackendDescriptor, BackendType};

use crate::backend::registry::{BackendSettings, CloudSettings};
use crate::monitor::config::{MonitorConfig, Subsystems};

fn deserialize_human_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = Option::<String>::deserialize(deserializer)?;
    match buf {
        Some(value) => humantime::parse_duration(&value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSection {
    #[serde(rename = "type")]
    pub backend_type: Option<String>,
    #[serde(default)]
    pub version: String,
    pub work_dir: Option<PathBuf>,
    pub posix_state_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudSection {
    pub image: Option<String>,
    pub flavor: Option<String>,
    pub network: Option<String>,
    pub key_name: Option<String>,
    pub template: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubsystemsSection {
    #[serde(default = "default_true")]
    pub sessions: bool,
    #[serde(default = "default_true")]
    pub jobs: bool,
    #[serde(default = "default_true")]
    pub transfers: bool,
}

impl Default for SubsystemsSection {
    fn default() -> Self {
        Self {
            sessions: true,
            jobs: true,
            transfers: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Contents of the configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub instance_id: String,
    pub machine_id: Option<String>,
    pub database: PathBuf,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub subsystems: SubsystemsSection,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub backend_timeout: Option<Duration>,
    pub max_parallel_queries: Option<usize>,
    #[serde(default)]
    pub cloud: CloudSection,
}

impl ConfigFile {
    pub fn parse(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    /// Machine identity of this instance, the host name when it is not configured.
    pub fn machine_id(&self) -> String {
        self.machine_id
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    pub fn backend_descriptor(&self) -> crate::Result<BackendDescriptor> {
        let backend_type = match &self.backend.backend_type {
            Some(name) => name.parse::<BackendType>()?,
            None => BackendType::Posix,
        };
        Ok(BackendDescriptor::new(
            backend_type,
            self.backend.version.clone(),
        ))
    }

    pub fn monitor_config(&self) -> crate::Result<MonitorConfig> {
        Ok(MonitorConfig::new(
            self.instance_id.clone(),
            self.machine_id(),
            self.backend_descriptor()?,
            Subsystems {
                sessions: self.subsystems.sessions,
                jobs: self.subsystems.jobs,
                transfers: self.subsystems.transfers,
            },
            self.interval,
            self.backend_timeout,
            self.max_parallel_queries,
        ))
    }

    pub fn backend_settings(&self) -> BackendSettings {
        let work_dir = self
            .backend
            .work_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let posix_state_dir = self
            .backend
            .posix_state_dir
            .clone()
            .unwrap_or_else(|| work_dir.join("batchmon-posix"));
        BackendSettings {
            work_dir,
            posix_state_dir,
            cloud: CloudSettings {
                image: self.cloud.image.clone(),
                flavor: self.cloud.flavor.clone(),
                network: self.cloud.network.clone(),
                key_name: self.cloud.key_name.clone(),
                template: self.cloud.template.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigFile;
    use batchcore::BackendType;
    use std::time::Duration;

    #[test]
    fn parse_full_config() {
        let config = ConfigFile::parse(
            r#"
instance_id = "vishnu_1"
machine_id = "cluster-a"
database = "/var/lib/batchmon/db.sqlite"
interval = "30s"
backend_timeout = "2m"
max_parallel_queries = 4

[backend]
type = "slurm"
version = "23.02"

[subsystems]
sessions = false

[cloud]
image = "ubuntu"
"#,
        )
        .unwrap();
        assert_eq!(config.machine_id(), "cluster-a");
        assert_eq!(config.interval, Some(Duration::from_secs(30)));
        assert_eq!(config.backend_timeout, Some(Duration::from_secs(120)));
        assert!(!config.subsystems.sessions);
        assert!(config.subsystems.jobs);
        assert!(config.subsystems.transfers);

        let backend = config.backend_descriptor().unwrap();
        assert_eq!(backend.backend_type, BackendType::Slurm);
        assert_eq!(backend.major_version(), Some(23));
        assert_eq!(
            config.backend_settings().cloud.image.as_deref(),
            Some("ubuntu")
        );
    }

    #[test]
    fn defaults() {
        let config = ConfigFile::parse(
            r#"
instance_id = "vishnu_1"
database = "db.sqlite"
"#,
        )
        .unwrap();
        assert!(!config.machine_id().is_empty());
        assert_eq!(
            config.backend_descriptor().unwrap().backend_type,
            BackendType::Posix
        );
        assert!(config.interval.is_none());
        let settings = config.backend_settings();
        assert!(settings.posix_state_dir.starts_with(&settings.work_dir));
    }

    #[test]
    fn reject_unknown_backend() {
        let config = ConfigFile::parse(
            r#"
instance_id = "vishnu_1"
database = "db.sqlite"
[backend]
type = "condor"
"#,
        )
        .unwrap();
        assert!(config.backend_descriptor().is_err());
    }

    #[test]
    fn reject_invalid_duration() {
        assert!(
            ConfigFile::parse(
                r#"
instance_id = "vishnu_1"
database = "db.sqlite"
interval = "often"
"#,
            )
            .is_err()
        );
    }

    #[test]
    fn reject_unknown_keys() {
        assert!(
            ConfigFile::parse(
                r#"
instance_id = "vishnu_1"
database = "db.sqlite"
color = "red"
"#,
            )
            .is_err()
        );
    }
}
