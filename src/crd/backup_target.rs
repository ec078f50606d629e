//! BackupTarget Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the single BackupTarget every Backup is stored on
pub const DEFAULT_BACKUP_TARGET_NAME: &str = "default";

/// BackupTarget resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "backup.oso.sh",
    version = "v1alpha1",
    kind = "BackupTarget",
    plural = "backuptargets",
    singular = "backuptarget",
    shortname = "bt",
    namespaced,
    printcolumn = r#"{"name": "URL", "type": "string", "jsonPath": ".spec.backupTargetURL"}"#,
    printcolumn = r#"{"name": "Credential", "type": "string", "jsonPath": ".spec.credentialSecret"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupTargetSpec {
    /// Remote store URL (s3://bucket@region/path, nfs://host:/path, ...)
    #[serde(rename = "backupTargetURL", default)]
    pub backup_target_url: String,

    /// Secret holding the target credentials, in the operator namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential_secret: String,

    /// Request a re-sync from the backup target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_requested_at: Option<DateTime<Utc>>,
}
