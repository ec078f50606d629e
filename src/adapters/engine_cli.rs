//! Engine client backed by the engine command line tool
//!
//! Transfers are started with `<binary> --url <engine> backup create ...`.
//! Progress is read from the `Engine` resources of the volume, whose status
//! is kept current by the engine monitor of the storage system.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client};
use tokio::process::Command;
use tracing::debug;

use crate::clients::{EngineClient, EngineClientFactory, TransferRequest, TransferStatus};
use crate::crd::cluster::{Engine, ENGINE_VOLUME_LABEL};
use crate::error::{Error, Result};

/// Arguments of `backup create`, in order
pub fn transfer_args(engine_address: &str, request: &TransferRequest) -> Vec<String> {
    let mut args = vec![
        "--url".to_string(),
        engine_address.to_string(),
        "backup".to_string(),
        "create".to_string(),
        "--backup-name".to_string(),
        request.backup_name.clone(),
        "--dest".to_string(),
        request.backup_target_url.clone(),
    ];
    if !request.backing_image_name.is_empty() {
        args.push("--backing-image-name".to_string());
        args.push(request.backing_image_name.clone());
        args.push("--backing-image-checksum".to_string());
        args.push(request.backing_image_checksum.clone());
    }
    for (key, value) in &request.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(request.snapshot_name.clone());
    args
}

async fn list_engines(client: &Client, namespace: &str, volume_name: &str) -> Result<Vec<Engine>> {
    let api: Api<Engine> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&format!("{}={}", ENGINE_VOLUME_LABEL, volume_name));
    Ok(api.list(&params).await?.items)
}

/// Flatten the per-backup status of every engine of a volume
pub fn collect_transfer_status(engines: &[Engine]) -> Vec<TransferStatus> {
    engines
        .iter()
        .filter_map(|e| e.status.as_ref())
        .flat_map(|s| s.backup_status.values())
        .map(|b| TransferStatus {
            snapshot_name: b.snapshot_name.clone(),
            progress: b.progress,
            error: b.error.clone(),
        })
        .collect()
}

/// Engine client bound to the running engine of one volume
pub struct CliEngineClient {
    client: Client,
    namespace: String,
    binary: PathBuf,
    volume_name: String,
    address: String,
}

#[async_trait]
impl EngineClient for CliEngineClient {
    fn volume_name(&self) -> &str {
        &self.volume_name
    }

    async fn start_transfer(&self, request: &TransferRequest) -> Result<()> {
        let args = transfer_args(&self.address, request);
        debug!(volume = %self.volume_name, args = ?args, "Starting snapshot transfer");
        let output = Command::new(&self.binary)
            .args(&args)
            .envs(&request.credential)
            .output()
            .await?;
        if output.status.success() {
            return Ok(());
        }
        Err(Error::engine(format!(
            "backup create for snapshot {} failed: {}",
            request.snapshot_name,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }

    async fn list_transfer_status(&self, volume_name: &str) -> Result<Vec<TransferStatus>> {
        let engines = list_engines(&self.client, &self.namespace, volume_name).await?;
        Ok(collect_transfer_status(&engines))
    }
}

/// Resolves the current engine of a volume
pub struct CliEngineClientFactory {
    client: Client,
    namespace: String,
    binary: PathBuf,
}

impl CliEngineClientFactory {
    pub fn new(client: Client, namespace: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl EngineClientFactory for CliEngineClientFactory {
    async fn client_for_volume(&self, volume_name: &str) -> Result<Arc<dyn EngineClient>> {
        let mut engines = list_engines(&self.client, &self.namespace, volume_name).await?;
        let engine = match engines.len() {
            0 => return Err(Error::not_found(format!("engine for volume {}", volume_name))),
            1 => engines.remove(0),
            n => {
                return Err(Error::engine(format!(
                    "volume {} has {} engines, expected one",
                    volume_name, n
                )))
            }
        };

        let status = engine.status.unwrap_or_default();
        if status.ip.is_empty() || status.port == 0 {
            return Err(Error::engine(format!(
                "engine of volume {} is not running",
                volume_name
            )));
        }

        Ok(Arc::new(CliEngineClient {
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            binary: self.binary.clone(),
            volume_name: volume_name.to_string(),
            address: format!("{}:{}", status.ip, status.port),
        }))
    }
}
