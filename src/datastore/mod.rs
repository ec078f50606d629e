//! Keyed object store consumed by the backup controller
//!
//! Every write carries the object's `resourceVersion`; a stale version is
//! rejected with [`Error::Conflict`](crate::Error::Conflict) and a missing
//! object is reported as [`Error::NotFound`](crate::Error::NotFound).

mod kube_store;

pub use kube_store::KubeDataStore;

use async_trait::async_trait;

use crate::crd::cluster::Volume;
use crate::crd::{Backup, BackupTarget, BackupVolume};
use crate::error::Result;

/// Trait abstracting the object store so the reconciler can run against the
/// Kubernetes API in production and an in-memory store in tests.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Fetch a Backup by name
    async fn get_backup(&self, name: &str) -> Result<Backup>;

    /// Persist the status block of a Backup
    async fn update_backup_status(&self, backup: &Backup) -> Result<Backup>;

    /// Attach the controller finalizer
    async fn add_backup_finalizer(&self, backup: &Backup) -> Result<Backup>;

    /// Drop the controller finalizer, allowing physical removal
    async fn remove_backup_finalizer(&self, backup: &Backup) -> Result<()>;

    async fn get_backup_volume(&self, name: &str) -> Result<BackupVolume>;

    /// Persist the spec of a BackupVolume
    async fn update_backup_volume(&self, backup_volume: &BackupVolume) -> Result<BackupVolume>;

    async fn get_backup_target(&self, name: &str) -> Result<BackupTarget>;

    /// Persist the spec of a BackupTarget
    async fn update_backup_target(&self, backup_target: &BackupTarget) -> Result<BackupTarget>;

    /// Value of a cluster setting; an empty value is an error
    async fn get_setting(&self, name: &str) -> Result<String>;

    async fn get_volume(&self, name: &str) -> Result<Volume>;

    async fn get_backing_image_checksum(&self, name: &str) -> Result<String>;

    /// Ready nodes on which the given engine image is deployed
    async fn list_ready_nodes_with_engine_image(&self, image: &str) -> Result<Vec<String>>;

    /// Whether the engine image is ready on the given node
    async fn check_engine_image_readiness(&self, image: &str, node: &str) -> Result<bool>;

    /// True for an empty node name, an unknown node, or a node that is not Ready
    async fn is_node_down_or_deleted(&self, node: &str) -> Result<bool>;
}
