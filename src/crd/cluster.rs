//! Storage-system resources read by the backup controller
//!
//! These are owned by other controllers of the storage system. Only the
//! fields the backup controller reads are modelled; unknown fields are
//! ignored on deserialization.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Setting naming the engine image every transfer must run with
pub const SETTING_DEFAULT_ENGINE_IMAGE: &str = "default-engine-image";

/// Label on Engine resources naming their volume
pub const ENGINE_VOLUME_LABEL: &str = "storage.oso.sh/volume";

/// Cluster-wide setting
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "storage.oso.sh",
    version = "v1alpha1",
    kind = "Setting",
    plural = "settings",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SettingSpec {
    #[serde(default)]
    pub value: String,
}

/// Engine image deployed across the nodes
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "storage.oso.sh",
    version = "v1alpha1",
    kind = "EngineImage",
    plural = "engineimages",
    namespaced,
    status = "EngineImageStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EngineImageSpec {
    pub image: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineImageStatus {
    /// Overall state, "ready" once deployed
    #[serde(default)]
    pub state: String,

    /// Per-node deployment readiness
    #[serde(default)]
    pub node_deployment_map: BTreeMap<String, bool>,
}

impl EngineImage {
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.state == "ready").unwrap_or(false)
    }

    pub fn is_deployed_on(&self, node: &str) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.node_deployment_map.get(node).copied())
            .unwrap_or(false)
    }
}

/// Volume managed by the storage system
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "storage.oso.sh",
    version = "v1alpha1",
    kind = "Volume",
    plural = "volumes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Backing image the volume was created from, empty if none
    #[serde(default)]
    pub backing_image: String,
}

/// Backing image shared by volumes
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "storage.oso.sh",
    version = "v1alpha1",
    kind = "BackingImage",
    plural = "backingimages",
    namespaced,
    status = "BackingImageStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BackingImageSpec {
    #[serde(default)]
    pub source_type: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackingImageStatus {
    #[serde(default)]
    pub checksum: String,
}

/// Engine serving a volume, reporting transfer progress per backup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "storage.oso.sh",
    version = "v1alpha1",
    kind = "Engine",
    plural = "engines",
    namespaced,
    status = "EngineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EngineSpec {
    pub volume_name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    /// Image the engine process currently runs
    #[serde(default)]
    pub current_image: String,

    /// Address of the engine process
    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub port: u16,

    /// Transfer status keyed by backup name
    #[serde(default)]
    pub backup_status: BTreeMap<String, EngineBackupStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineBackupStatus {
    #[serde(default)]
    pub snapshot_name: String,

    /// 0-100
    #[serde(default)]
    pub progress: u8,

    #[serde(default)]
    pub error: String,

    #[serde(default, rename = "backupURL")]
    pub backup_url: String,
}
