use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use batchcore::{BackendDescriptor, BackendType, Map};

use crate::backend::cloud::{OpenNebulaAdapter, OpenStackAdapter};
use crate::backend::loadleveler::LoadLevelerAdapter;
use crate::backend::lsf::LsfAdapter;
use crate::backend::oar::OarAdapter;
use crate::backend::pbs::{PbsAdapter, PbsFlavor};
use crate::backend::posix::PosixAdapter;
use crate::backend::sge::SgeAdapter;
use crate::backend::slurm::SlurmAdapter;
use crate::backend::{BackendAdapter, BackendError, BackendResult};
use crate::common::process::ProcessProbe;

#[derive(Clone, Debug, Default)]
pub struct CloudSettings {
    pub image: Option<String>,
    pub flavor: Option<String>,
    pub network: Option<String>,
    pub key_name: Option<String>,
    /// OpenNebula VM template
    pub template: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BackendSettings {
    /// Directory in which backend commands are executed.
    pub work_dir: PathBuf,
    /// Exit status files of locally forked jobs.
    pub posix_state_dir: PathBuf,
    pub cloud: CloudSettings,
}

/// Major versions of a backend that its adapter understands, `None` means any version.
fn supported_major_versions(backend_type: BackendType) -> Option<RangeInclusive<u32>> {
    match backend_type {
        BackendType::Torque => Some(2..=7),
        BackendType::LoadLeveler => Some(2..=5),
        BackendType::Slurm => Some(2..=25),
        BackendType::Lsf => Some(7..=10),
        BackendType::Sge => Some(6..=8),
        // PBS Pro switched to year based versions (2020.1, 2022.1, ...)
        BackendType::Pbs => Some(10..=2030),
        BackendType::Oar => Some(2..=3),
        BackendType::Posix | BackendType::DeltaCloud | BackendType::OpenNebula => None,
    }
}

pub struct SupportedBackend {
    pub backend_type: BackendType,
    pub versions: Option<RangeInclusive<u32>>,
}

impl Display for SupportedBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.versions {
            Some(versions) => write!(
                f,
                "{} (versions {}.x to {}.x)",
                self.backend_type,
                versions.start(),
                versions.end()
            ),
            None => write!(f, "{} (any version)", self.backend_type),
        }
    }
}

/// Maps a backend descriptor to the adapter that handles it.
///
/// Adapters are created on first use and shared afterwards.
pub struct BackendRegistry {
    settings: BackendSettings,
    probe: Arc<dyn ProcessProbe>,
    adapters: Mutex<Map<BackendDescriptor, Arc<dyn BackendAdapter>>>,
}

impl BackendRegistry {
    pub fn new(settings: BackendSettings, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            settings,
            probe,
            adapters: Default::default(),
        }
    }

    pub fn supported() -> Vec<SupportedBackend> {
        BackendType::ALL
            .iter()
            .map(|backend_type| SupportedBackend {
                backend_type: *backend_type,
                versions: supported_major_versions(*backend_type),
            })
            .collect()
    }

    /// Registers an adapter for a descriptor, replacing the built-in one.
    pub fn register(&self, descriptor: BackendDescriptor, adapter: Arc<dyn BackendAdapter>) {
        self.adapters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor, adapter);
    }

    /// Returns the adapter of the given backend.
    ///
    /// An empty version stands for the version installed on this machine and is always accepted.
    pub fn resolve(
        &self,
        backend_type: BackendType,
        version: &str,
    ) -> BackendResult<Arc<dyn BackendAdapter>> {
        let descriptor = BackendDescriptor::new(backend_type, version.trim());
        let mut adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(adapter) = adapters.get(&descriptor) {
            return Ok(adapter.clone());
        }
        check_version(&descriptor)?;

        let adapter = self.create_adapter(backend_type);
        log::debug!("Created adapter for backend {descriptor}");
        adapters.insert(descriptor, adapter.clone());
        Ok(adapter)
    }

    pub fn resolve_descriptor(
        &self,
        descriptor: &BackendDescriptor,
    ) -> BackendResult<Arc<dyn BackendAdapter>> {
        self.resolve(descriptor.backend_type, &descriptor.version)
    }

    fn create_adapter(&self, backend_type: BackendType) -> Arc<dyn BackendAdapter> {
        let workdir = self.settings.work_dir.clone();
        match backend_type {
            BackendType::Torque => Arc::new(PbsAdapter::new(PbsFlavor::Torque, workdir)),
            BackendType::Pbs => Arc::new(PbsAdapter::new(PbsFlavor::Pro, workdir)),
            BackendType::Slurm => Arc::new(SlurmAdapter::new(workdir)),
            BackendType::Lsf => Arc::new(LsfAdapter::new(workdir)),
            BackendType::Sge => Arc::new(SgeAdapter::new(workdir)),
            BackendType::LoadLeveler => Arc::new(LoadLevelerAdapter::new(workdir)),
            BackendType::Oar => Arc::new(OarAdapter::new(workdir)),
            BackendType::Posix => Arc::new(PosixAdapter::new(
                workdir,
                self.settings.posix_state_dir.clone(),
                self.probe.clone(),
            )),
            BackendType::DeltaCloud => {
                Arc::new(OpenStackAdapter::new(workdir, self.settings.cloud.clone()))
            }
            BackendType::OpenNebula => {
                Arc::new(OpenNebulaAdapter::new(workdir, self.settings.cloud.clone()))
            }
        }
    }
}

fn check_version(descriptor: &BackendDescriptor) -> BackendResult<()> {
    let Some(versions) = supported_major_versions(descriptor.backend_type) else {
        return Ok(());
    };
    if descriptor.version.is_empty() {
        return Ok(());
    }
    match descriptor.major_version() {
        Some(major) if versions.contains(&major) => Ok(()),
        _ => Err(BackendError::UnsupportedBackend {
            backend_type: descriptor.backend_type,
            version: descriptor.version.clone(),
        }),
    }
}
