//! Operator configuration
//!
//! Every option can be given on the command line or through the environment,
//! which is how the Deployment manifest sets them.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Volume backup controller
#[derive(Parser, Clone, Debug)]
#[command(name = "volume-backup-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Identity of this controller replica, recorded as the owner of the
    /// backups it is responsible for. Must match the node name.
    #[arg(long, env = "NODE_NAME")]
    pub controller_id: String,

    /// Namespace holding the backup resources
    #[arg(long, env = "POD_NAMESPACE", default_value = "backup-system")]
    pub namespace: String,

    /// Number of parallel reconcile workers
    #[arg(
        long,
        env = "BACKUP_CONTROLLER_WORKERS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub workers: u16,

    /// Retries of a failing Backup before it waits for its next change
    #[arg(long, env = "BACKUP_CONTROLLER_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// First retry delay of a failing Backup, in milliseconds
    #[arg(long, env = "BACKUP_CONTROLLER_RETRY_BASE_MS", default_value_t = 5)]
    pub retry_base_ms: u64,

    /// Upper bound of the retry delay, in seconds
    #[arg(long, env = "BACKUP_CONTROLLER_RETRY_MAX_SECS", default_value_t = 1000)]
    pub retry_max_secs: u64,

    /// Interval between two transfer progress polls, in seconds
    #[arg(
        long,
        env = "BACKUP_STATUS_POLL_SECS",
        default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_secs: u64,

    /// Port of the metrics and probe server
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Engine command line tool used to start transfers
    #[arg(long, env = "ENGINE_BINARY", default_value = "/usr/local/bin/engine")]
    pub engine_binary: PathBuf,

    /// Backup-store command line tool used to inspect and delete backups
    #[arg(long, env = "BACKUP_STORE_BINARY", default_value = "/usr/local/bin/backup-store")]
    pub backup_store_binary: PathBuf,

    /// Do not record Kubernetes events
    #[arg(long, env = "DISABLE_EVENTS")]
    pub disable_events: bool,
}

impl OperatorConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
