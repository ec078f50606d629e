//! Clients for the remote backup target and the storage engine
//!
//! Both are external collaborators: the controller only decides *when* to
//! inspect, delete or transfer, never *how*. Production implementations live
//! in [`crate::adapters`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::crd::BackupTarget;
use crate::error::{Error, Result};

/// Metadata of a backup as stored on the target
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct BackupInfo {
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(default)]
    pub snapshot_name: String,
    #[serde(default)]
    pub snapshot_created: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_name: String,
    #[serde(default)]
    pub volume_size: String,
    #[serde(default)]
    pub volume_created: String,
    #[serde(default)]
    pub volume_backing_image_name: String,
}

/// Build the URL addressing one backup of one volume on the target.
///
/// Backup and volume names are Kubernetes object names, so they need no
/// percent-encoding.
pub fn encode_backup_url(backup_name: &str, volume_name: &str, target_url: &str) -> Result<String> {
    let parsed = Url::parse(target_url).map_err(|e| {
        Error::config(format!("invalid backup target URL {}: {}", target_url, e))
    })?;
    let separator = if parsed.query().is_some() { '&' } else { '?' };
    Ok(format!(
        "{}{}backup={}&volume={}",
        target_url, separator, backup_name, volume_name
    ))
}

/// Client bound to one backup target endpoint
#[async_trait]
pub trait BackupTargetClient: Send + Sync {
    /// Endpoint URL of the target
    fn url(&self) -> &str;

    /// Credentials resolved for the target (environment-style keys)
    fn credential(&self) -> &BTreeMap<String, String>;

    /// Read the stored metadata of a backup.
    ///
    /// Returns [`Error::InProgress`] while the backup is still being written
    /// and `Ok(None)` when the target has nothing to report.
    async fn inspect_backup(&self, backup_url: &str) -> Result<Option<BackupInfo>>;

    /// Delete a backup. Deleting a backup that does not exist succeeds.
    async fn delete_backup(&self, backup_url: &str) -> Result<()>;
}

/// Builds target clients, resolving credentials on the way
#[async_trait]
pub trait BackupTargetClientFactory: Send + Sync {
    async fn client_for(&self, target: &BackupTarget) -> Result<Arc<dyn BackupTargetClient>>;
}

/// Everything the engine needs to push a snapshot to the target
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferRequest {
    pub backup_name: String,
    pub snapshot_name: String,
    pub backup_target_url: String,
    pub backing_image_name: String,
    pub backing_image_checksum: String,
    pub labels: BTreeMap<String, String>,
    pub credential: BTreeMap<String, String>,
}

/// Progress of one transfer as reported by the engine
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferStatus {
    pub snapshot_name: String,
    /// 0-100
    pub progress: u8,
    /// Non-empty once the transfer failed
    pub error: String,
}

/// Client for the engine serving one volume
#[async_trait]
pub trait EngineClient: Send + Sync {
    fn volume_name(&self) -> &str;

    /// Start transferring a snapshot to the target
    async fn start_transfer(&self, request: &TransferRequest) -> Result<()>;

    /// Status of every transfer currently known to the volume's engines
    async fn list_transfer_status(&self, volume_name: &str) -> Result<Vec<TransferStatus>>;
}

/// Resolves the live engine client of a volume
#[async_trait]
pub trait EngineClientFactory: Send + Sync {
    async fn client_for_volume(&self, volume_name: &str) -> Result<Arc<dyn EngineClient>>;
}
