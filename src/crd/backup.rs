//! Backup Custom Resource Definition

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Finalizer held on every live Backup until remote cleanup ran
pub const BACKUP_FINALIZER: &str = "backup.oso.sh/backup-controller";

/// Label naming the volume a Backup belongs to
pub const BACKUP_VOLUME_LABEL: &str = "backup.oso.sh/backup-volume";

/// Backup resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "backup.oso.sh",
    version = "v1alpha1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    shortname = "bk",
    namespaced,
    status = "BackupStatus",
    printcolumn = r#"{"name": "Snapshot", "type": "string", "jsonPath": ".spec.snapshotName"}"#,
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Size", "type": "string", "jsonPath": ".status.size"}"#,
    printcolumn = r#"{"name": "Owner", "type": "string", "jsonPath": ".status.ownerID"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Snapshot to transfer. Empty for backups imported from the target.
    #[serde(default)]
    pub snapshot_name: String,

    /// Labels attached to the remote backup
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Request a re-sync of the status from the backup target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_requested_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a Backup
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BackupState {
    /// Nothing has happened yet
    #[default]
    #[serde(rename = "")]
    Unset,
    /// Transfer to the backup target is running
    InProgress,
    /// Backup exists on the target
    Completed,
    /// Transfer failed
    Error,
    /// Transfer status could not be determined
    Unknown,
}

impl BackupState {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// Completed is reachable from any state because the sync path may import
    /// a backup that already exists on the target. Unknown is only reachable
    /// from InProgress, and nothing ever returns to Unset.
    pub fn can_transition_to(self, next: BackupState) -> bool {
        use BackupState::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Unset) => false,
            (_, Completed) => true,
            (Unset, InProgress) | (Unset, Error) => true,
            (InProgress, Error) | (InProgress, Unknown) => true,
            (Unknown, Error) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupState::Unset => "",
            BackupState::InProgress => "InProgress",
            BackupState::Completed => "Completed",
            BackupState::Error => "Error",
            BackupState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// Controller replica currently responsible for this Backup
    #[serde(rename = "ownerID", default)]
    pub owner_id: String,

    /// Lifecycle state
    #[serde(default)]
    pub state: BackupState,

    /// Remote backup URL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Snapshot the remote backup was taken from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot_name: String,

    /// Snapshot creation time as reported by the target
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot_created_at: String,

    /// Backup creation time as reported by the target
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backup_created_at: String,

    /// Backup size in bytes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,

    /// Labels stored with the remote backup
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Messages reported by the target
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<String, String>,

    /// Source volume name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_name: String,

    /// Source volume size in bytes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_size: String,

    /// Source volume creation time
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_created: String,

    /// Backing image of the source volume
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_backing_image_name: String,

    /// Last time the status was synced from the target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Backup {
    /// Current lifecycle state (Unset when no status exists yet)
    pub fn state(&self) -> BackupState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    /// Recorded owner, empty when unclaimed
    pub fn owner_id(&self) -> &str {
        self.status.as_ref().map(|s| s.owner_id.as_str()).unwrap_or("")
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut BackupStatus {
        self.status.get_or_insert_with(BackupStatus::default)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == BACKUP_FINALIZER)
    }

    /// Name of the owning volume, taken from the backup-volume label
    pub fn backup_volume_name(&self) -> Result<String> {
        self.labels()
            .get(BACKUP_VOLUME_LABEL)
            .cloned()
            .ok_or_else(|| {
                Error::not_found(format!(
                    "backup {} has no {} label",
                    self.name_any(),
                    BACKUP_VOLUME_LABEL
                ))
            })
    }

    /// Whether anything of this backup may exist on the target.
    ///
    /// A URL is only recorded by the sync path, so a transfer that was ever
    /// started also counts.
    pub fn has_remote_presence(&self) -> bool {
        match &self.status {
            Some(status) => !status.url.is_empty() || status.state != BackupState::Unset,
            None => false,
        }
    }

    /// Whether the status already reflects the latest sync request.
    ///
    /// A request made at exactly the last sync instant counts as served.
    pub fn is_synced(&self) -> bool {
        let Some(last_synced) = self.status.as_ref().and_then(|s| s.last_synced_at) else {
            return false;
        };
        match self.spec.sync_requested_at {
            None => true,
            Some(requested) => requested <= last_synced,
        }
    }
}
