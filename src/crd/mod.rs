//! Custom Resource Definitions for the Volume Backup Operator

mod backup;
mod backup_target;
mod backup_volume;
pub mod cluster;

pub use backup::*;
pub use backup_target::*;
pub use backup_volume::*;

use kube::CustomResourceExt;

/// Generate the YAML manifests of the CRDs this operator owns
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![
        serde_yaml::to_string(&Backup::crd())?,
        serde_yaml::to_string(&BackupVolume::crd())?,
        serde_yaml::to_string(&BackupTarget::crd())?,
    ])
}
