//! Kubernetes API backed [`DataStore`]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};

use super::DataStore;
use crate::crd::cluster::{BackingImage, EngineImage, Setting, Volume};
use crate::crd::{Backup, BackupTarget, BackupVolume, BACKUP_FINALIZER};
use crate::error::{Error, Result};

/// Store talking to the API server, scoped to the operator namespace
#[derive(Clone)]
pub struct KubeDataStore {
    client: Client,
    namespace: String,
}

impl KubeDataStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn engine_images_for(&self, image: &str) -> Result<Vec<EngineImage>> {
        let api: Api<EngineImage> = self.api();
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|ei| ei.spec.image == image)
            .collect())
    }

    async fn replace_backup(&self, backup: &Backup) -> Result<Backup> {
        let name = backup.name_any();
        let api: Api<Backup> = self.api();
        api.replace(&name, &PostParams::default(), backup)
            .await
            .map_err(|e| map_api_error(e, "backup", &name))
    }
}

/// Translate 404/409 API responses into the store's error taxonomy
fn map_api_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => {
            Error::not_found(format!("{} {}", kind, name))
        }
        kube::Error::Api(resp) if resp.code == 409 => {
            Error::conflict(format!("{} {}: {}", kind, name, resp.message))
        }
        other => Error::Kube(other),
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

#[async_trait]
impl DataStore for KubeDataStore {
    async fn get_backup(&self, name: &str) -> Result<Backup> {
        let api: Api<Backup> = self.api();
        api.get(name)
            .await
            .map_err(|e| map_api_error(e, "backup", name))
    }

    async fn update_backup_status(&self, backup: &Backup) -> Result<Backup> {
        let name = backup.name_any();
        let api: Api<Backup> = self.api();
        let data = serde_json::to_vec(backup)?;
        api.replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| map_api_error(e, "backup", &name))
    }

    async fn add_backup_finalizer(&self, backup: &Backup) -> Result<Backup> {
        if backup.has_finalizer() {
            return Ok(backup.clone());
        }
        let mut updated = backup.clone();
        updated.finalizers_mut().push(BACKUP_FINALIZER.to_string());
        self.replace_backup(&updated).await
    }

    async fn remove_backup_finalizer(&self, backup: &Backup) -> Result<()> {
        if !backup.has_finalizer() {
            return Ok(());
        }
        let mut updated = backup.clone();
        updated.finalizers_mut().retain(|f| f != BACKUP_FINALIZER);
        match self.replace_backup(&updated).await {
            Ok(_) => Ok(()),
            // Removing the last finalizer may let the object vanish first
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_backup_volume(&self, name: &str) -> Result<BackupVolume> {
        let api: Api<BackupVolume> = self.api();
        api.get(name)
            .await
            .map_err(|e| map_api_error(e, "backup volume", name))
    }

    async fn update_backup_volume(&self, backup_volume: &BackupVolume) -> Result<BackupVolume> {
        let name = backup_volume.name_any();
        let api: Api<BackupVolume> = self.api();
        api.replace(&name, &PostParams::default(), backup_volume)
            .await
            .map_err(|e| map_api_error(e, "backup volume", &name))
    }

    async fn get_backup_target(&self, name: &str) -> Result<BackupTarget> {
        let api: Api<BackupTarget> = self.api();
        api.get(name)
            .await
            .map_err(|e| map_api_error(e, "backup target", name))
    }

    async fn update_backup_target(&self, backup_target: &BackupTarget) -> Result<BackupTarget> {
        let name = backup_target.name_any();
        let api: Api<BackupTarget> = self.api();
        api.replace(&name, &PostParams::default(), backup_target)
            .await
            .map_err(|e| map_api_error(e, "backup target", &name))
    }

    async fn get_setting(&self, name: &str) -> Result<String> {
        let api: Api<Setting> = self.api();
        let setting = api
            .get(name)
            .await
            .map_err(|e| map_api_error(e, "setting", name))?;
        if setting.spec.value.is_empty() {
            return Err(Error::config(format!("setting {} is empty", name)));
        }
        Ok(setting.spec.value)
    }

    async fn get_volume(&self, name: &str) -> Result<Volume> {
        let api: Api<Volume> = self.api();
        api.get(name)
            .await
            .map_err(|e| map_api_error(e, "volume", name))
    }

    async fn get_backing_image_checksum(&self, name: &str) -> Result<String> {
        let api: Api<BackingImage> = self.api();
        let bi = api
            .get(name)
            .await
            .map_err(|e| map_api_error(e, "backing image", name))?;
        Ok(bi.status.map(|s| s.checksum).unwrap_or_default())
    }

    async fn list_ready_nodes_with_engine_image(&self, image: &str) -> Result<Vec<String>> {
        let images: Vec<EngineImage> = self
            .engine_images_for(image)
            .await?
            .into_iter()
            .filter(|ei| ei.is_ready())
            .collect();
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let nodes: Api<Node> = Api::all(self.client.clone());
        let ready = nodes
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(node_is_ready)
            .map(|n| n.name_any())
            .filter(|name| images.iter().any(|ei| ei.is_deployed_on(name)))
            .collect();
        Ok(ready)
    }

    async fn check_engine_image_readiness(&self, image: &str, node: &str) -> Result<bool> {
        if node.is_empty() {
            return Ok(false);
        }
        let images = self.engine_images_for(image).await?;
        Ok(images
            .iter()
            .any(|ei| ei.is_ready() && ei.is_deployed_on(node)))
    }

    async fn is_node_down_or_deleted(&self, node: &str) -> Result<bool> {
        if node.is_empty() {
            return Ok(true);
        }
        let nodes: Api<Node> = Api::all(self.client.clone());
        match nodes.get_opt(node).await? {
            Some(n) => Ok(!node_is_ready(&n)),
            None => Ok(true),
        }
    }
}
