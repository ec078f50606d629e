//! Backup target client backed by the backup-store command line tool
//!
//! The tool is invoked as `<binary> backup inspect <url>` and
//! `<binary> backup rm <url>`, with the target credentials in its
//! environment. `inspect` prints the backup metadata as JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;
use tokio::process::Command;
use tracing::debug;

use super::secrets::get_target_credentials;
use crate::clients::{BackupInfo, BackupTargetClient, BackupTargetClientFactory};
use crate::crd::BackupTarget;
use crate::error::{Error, Result};

/// Target client for one endpoint
#[derive(Clone, Debug)]
pub struct CliBackupTargetClient {
    binary: PathBuf,
    url: String,
    credential: BTreeMap<String, String>,
}

impl CliBackupTargetClient {
    pub fn new(
        binary: impl Into<PathBuf>,
        url: impl Into<String>,
        credential: BTreeMap<String, String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            url: url.into(),
            credential,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(binary = %self.binary.display(), args = ?args, "Running backup-store command");
        let output = Command::new(&self.binary)
            .args(args)
            .envs(&self.credential)
            .output()
            .await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim();
        if message.contains("in progress") {
            return Err(Error::InProgress(message.to_string()));
        }
        Err(Error::remote(format!(
            "{} failed: {}",
            args.join(" "),
            message
        )))
    }
}

fn is_absent(err: &Error) -> bool {
    match err {
        Error::Remote(msg) => {
            msg.contains("cannot find") || msg.contains("not found") || msg.contains("does not exist")
        }
        _ => false,
    }
}

#[async_trait]
impl BackupTargetClient for CliBackupTargetClient {
    fn url(&self) -> &str {
        &self.url
    }

    fn credential(&self) -> &BTreeMap<String, String> {
        &self.credential
    }

    async fn inspect_backup(&self, backup_url: &str) -> Result<Option<BackupInfo>> {
        let stdout = self.run(&["backup", "inspect", backup_url]).await?;
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        let info: BackupInfo = serde_json::from_str(trimmed)?;
        Ok(Some(info))
    }

    async fn delete_backup(&self, backup_url: &str) -> Result<()> {
        match self.run(&["backup", "rm", backup_url]).await {
            Err(e) if is_absent(&e) => {
                debug!(url = %backup_url, "Remote backup already absent");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }
}

/// Builds [`CliBackupTargetClient`]s, reading credentials from the target's secret
pub struct CliBackupTargetClientFactory {
    client: Client,
    namespace: String,
    binary: PathBuf,
}

impl CliBackupTargetClientFactory {
    pub fn new(client: Client, namespace: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl BackupTargetClientFactory for CliBackupTargetClientFactory {
    async fn client_for(&self, target: &BackupTarget) -> Result<Arc<dyn BackupTargetClient>> {
        if target.spec.backup_target_url.is_empty() {
            return Err(Error::config("backup target URL is not set"));
        }
        let credential =
            get_target_credentials(&self.client, &self.namespace, &target.spec.credential_secret)
                .await?;
        Ok(Arc::new(CliBackupTargetClient::new(
            self.binary.clone(),
            target.spec.backup_target_url.clone(),
            credential,
        )))
    }
}
