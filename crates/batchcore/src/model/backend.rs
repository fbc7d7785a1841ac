use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::error::CoreError;

/// Family of the system that executes jobs.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum BackendType {
    Torque,
    LoadLeveler,
    Slurm,
    Lsf,
    Sge,
    Pbs,
    /// OpenStack compatible IaaS provider.
    DeltaCloud,
    Posix,
    OpenNebula,
    Oar,
}

impl BackendType {
    pub const ALL: [BackendType; 10] = [
        BackendType::Torque,
        BackendType::LoadLeveler,
        BackendType::Slurm,
        BackendType::Lsf,
        BackendType::Sge,
        BackendType::Pbs,
        BackendType::DeltaCloud,
        BackendType::Posix,
        BackendType::OpenNebula,
        BackendType::Oar,
    ];

    /// Code stored in the `batch_type` column of the job table.
    pub fn code(self) -> i64 {
        match self {
            BackendType::Torque => 0,
            BackendType::LoadLeveler => 1,
            BackendType::Slurm => 2,
            BackendType::Lsf => 3,
            BackendType::Sge => 4,
            BackendType::Pbs => 5,
            BackendType::DeltaCloud => 6,
            BackendType::Posix => 7,
            BackendType::OpenNebula => 8,
            BackendType::Oar => 9,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, CoreError> {
        BackendType::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or_else(|| CoreError::UnknownBackendType(code.to_string()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendType::Torque => "TORQUE",
            BackendType::LoadLeveler => "LOADLEVELER",
            BackendType::Slurm => "SLURM",
            BackendType::Lsf => "LSF",
            BackendType::Sge => "SGE",
            BackendType::Pbs => "PBS",
            BackendType::DeltaCloud => "DELTACLOUD",
            BackendType::Posix => "POSIX",
            BackendType::OpenNebula => "OPENNEBULA",
            BackendType::Oar => "OAR",
        }
    }

    pub fn is_cloud(self) -> bool {
        matches!(self, BackendType::DeltaCloud | BackendType::OpenNebula)
    }
}

impl FromStr for BackendType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let backend = match s.trim().to_ascii_uppercase().as_str() {
            "TORQUE" => BackendType::Torque,
            "LOADLEVELER" => BackendType::LoadLeveler,
            "SLURM" => BackendType::Slurm,
            "LSF" => BackendType::Lsf,
            "SGE" => BackendType::Sge,
            "PBS" | "PBSPRO" => BackendType::Pbs,
            "DELTACLOUD" | "OPENSTACK" => BackendType::DeltaCloud,
            "POSIX" => BackendType::Posix,
            "OPENNEBULA" => BackendType::OpenNebula,
            "OAR" => BackendType::Oar,
            _ => return Err(CoreError::UnknownBackendType(s.to_string())),
        };
        Ok(backend)
    }
}

impl Display for BackendType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects exactly one adapter.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub backend_type: BackendType,
    pub version: String,
}

impl BackendDescriptor {
    pub fn new<S: Into<String>>(backend_type: BackendType, version: S) -> Self {
        Self {
            backend_type,
            version: version.into(),
        }
    }

    /// Leading numeric component of the version, if there is one.
    pub fn major_version(&self) -> Option<u32> {
        let major = self.version.trim().split(['.', '-', '_']).next()?;
        major.parse().ok()
    }
}

impl Display for BackendDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.backend_type)
        } else {
            write!(f, "{} {}", self.backend_type, self.version)
        }
    }
}
