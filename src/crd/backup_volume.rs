//! BackupVolume Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// BackupVolume aggregates the backups stored on the target for one volume.
///
/// It is owned by the backup volume controller; this operator only bumps
/// `syncRequestedAt` to ask for a prompt re-derivation of the status.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "backup.oso.sh",
    version = "v1alpha1",
    kind = "BackupVolume",
    plural = "backupvolumes",
    singular = "backupvolume",
    shortname = "bv",
    namespaced,
    status = "BackupVolumeStatus",
    printcolumn = r#"{"name": "Last Backup", "type": "string", "jsonPath": ".status.lastBackupName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupVolumeSpec {
    /// Request a re-sync from the backup target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_requested_at: Option<DateTime<Utc>>,
}

/// BackupVolume status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupVolumeStatus {
    /// Most recent backup of the volume
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_backup_name: String,

    /// Checksum of the backing image used by the stored backups
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backing_image_checksum: String,
}

impl BackupVolume {
    pub fn last_backup_name(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.last_backup_name.as_str())
            .unwrap_or("")
    }

    pub fn backing_image_checksum(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.backing_image_checksum.as_str())
            .unwrap_or("")
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
